//! Resource families and the generic list/get/create/update/delete surfaces over them.

use std::fmt::Debug;
use std::marker::PhantomData;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::AppStoreConnectClient;
use crate::context::CallContext;
use crate::envelope::{
    Empty, LinkagesResponse, ListResponse, Relationships, ResourceRef, SingleResponse,
    linkage_body, resource_body,
};
use crate::error::{AscError, Result};
use crate::query::{ListOptions, ListTarget, QueryBag};

/// One declarative row per resource family: type tag, collection path and the
/// query options the API recognizes for it.
pub trait ResourceFamily {
    const TYPE: &'static str;
    /// Collection path relative to the base URL, e.g. `v1/webhooks`.
    const COLLECTION: &'static str;
    const FILTERS: &'static [&'static str] = &[];
    const INCLUDES: &'static [&'static str] = &[];
    const SORTS: &'static [&'static str] = &[];
    /// Types besides `TYPE` that accept `fields[..]`.
    const FIELD_TYPES: &'static [&'static str] = &[];

    type Attributes: Serialize + DeserializeOwned + Default + Clone + Debug + Send;
}

macro_rules! resource_family {
    (
        $(#[$meta:meta])*
        $name:ident {
            type: $type_tag:literal,
            path: $path:literal,
            attributes: $attrs:ty
            $(, filters: [$($filter:literal),* $(,)?])?
            $(, includes: [$($include:literal),* $(,)?])?
            $(, sorts: [$($sort:literal),* $(,)?])?
            $(, fields: [$($field:literal),* $(,)?])?
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl $crate::resources::ResourceFamily for $name {
            const TYPE: &'static str = $type_tag;
            const COLLECTION: &'static str = $path;
            $(const FILTERS: &'static [&'static str] = &[$($filter),*];)?
            $(const INCLUDES: &'static [&'static str] = &[$($include),*];)?
            $(const SORTS: &'static [&'static str] = &[$($sort),*];)?
            $(const FIELD_TYPES: &'static [&'static str] = &[$($field),*];)?

            type Attributes = $attrs;
        }
    };
}

pub mod apps;
pub mod game_center;
pub mod pass_type_ids;
pub mod webhooks;

/// Trims `id` and rejects values that are empty or would escape the resource path.
pub fn required_id<'a>(what: &str, id: &'a str) -> Result<&'a str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AscError::InvalidArgument(format!("{what} id is required")));
    }
    if id.contains(['/', '?', '#']) || id == "." || id == ".." {
        return Err(AscError::InvalidArgument(format!(
            "{what} id {id:?} contains reserved characters"
        )));
    }
    Ok(id)
}

impl AppStoreConnectClient {
    pub fn resources<F: ResourceFamily>(&self) -> Resources<'_, F> {
        Resources {
            client: self,
            family: PhantomData,
        }
    }
}

/// Typed surface for resource family `F`.
pub struct Resources<'c, F> {
    client: &'c AppStoreConnectClient,
    family: PhantomData<fn() -> F>,
}

impl<'c, F: ResourceFamily> Resources<'c, F> {
    pub fn client(&self) -> &'c AppStoreConnectClient {
        self.client
    }

    fn item_path(id: &str) -> Result<String> {
        Ok(format!("{}/{}", F::COLLECTION, required_id(F::TYPE, id)?))
    }

    fn relationship_path(id: &str, relationship: &str) -> Result<String> {
        let relationship = required_id("relationship", relationship)?;
        Ok(format!("{}/relationships/{relationship}", Self::item_path(id)?))
    }

    pub async fn list(
        &self,
        ctx: &CallContext,
        options: &ListOptions<F>,
    ) -> Result<ListResponse<F::Attributes>> {
        self.list_at(ctx, F::COLLECTION, options).await
    }

    /// Lists this family under another path, e.g. `v1/apps/{id}/webhooks`.
    pub async fn list_at(
        &self,
        ctx: &CallContext,
        path: &str,
        options: &ListOptions<F>,
    ) -> Result<ListResponse<F::Attributes>> {
        match options.target()? {
            ListTarget::Next(url) => self.client.do_next(ctx, &url).await,
            ListTarget::Query(query) => self.client.do_read(ctx, path, &query).await,
        }
    }

    pub async fn list_all(
        &self,
        ctx: &CallContext,
        options: &ListOptions<F>,
    ) -> Result<ListResponse<F::Attributes>> {
        self.list_all_at(ctx, F::COLLECTION, options).await
    }

    pub async fn list_all_at(
        &self,
        ctx: &CallContext,
        path: &str,
        options: &ListOptions<F>,
    ) -> Result<ListResponse<F::Attributes>> {
        let first = self.list_at(ctx, path, options).await?;
        self.client.paginate(ctx, first).await
    }

    /// Only `include` and `fields` of `options` apply.
    pub async fn get(
        &self,
        ctx: &CallContext,
        id: &str,
        options: &ListOptions<F>,
    ) -> Result<SingleResponse<F::Attributes>> {
        let path = Self::item_path(id)?;
        self.client
            .do_read(ctx, &path, &options.to_detail_query()?)
            .await
    }

    pub async fn create<A: Serialize>(
        &self,
        ctx: &CallContext,
        attributes: Option<&A>,
        relationships: Relationships,
    ) -> Result<SingleResponse<F::Attributes>> {
        let body = resource_body(F::TYPE, None, attributes, Some(relationships))?;
        self.client
            .do_write(ctx, Method::POST, F::COLLECTION, Some(&body))
            .await
    }

    pub async fn update<A: Serialize>(
        &self,
        ctx: &CallContext,
        id: &str,
        attributes: Option<&A>,
        relationships: Option<Relationships>,
    ) -> Result<SingleResponse<F::Attributes>> {
        let id = required_id(F::TYPE, id)?;
        let body = resource_body(F::TYPE, Some(id), attributes, relationships)?;
        let path = Self::item_path(id)?;
        self.client
            .do_write(ctx, Method::PATCH, &path, Some(&body))
            .await
    }

    pub async fn delete(&self, ctx: &CallContext, id: &str) -> Result<Empty> {
        let path = Self::item_path(id)?;
        self.client
            .do_write::<Empty, ()>(ctx, Method::DELETE, &path, None)
            .await
    }

    /// `(type, id)` linkages of a to-many relationship. Only `limit` and the next URL apply.
    pub async fn linkages(
        &self,
        ctx: &CallContext,
        id: &str,
        relationship: &str,
        options: &ListOptions<F>,
    ) -> Result<LinkagesResponse> {
        let path = Self::relationship_path(id, relationship)?;
        match options.next() {
            Some(url) => self.client.do_next(ctx, url).await,
            None => {
                let mut query = QueryBag::new();
                if let Some(limit) = options.limit_value() {
                    query.set("limit", limit.to_string());
                }
                self.client.do_read(ctx, &path, &query).await
            }
        }
    }

    pub async fn linkages_all(
        &self,
        ctx: &CallContext,
        id: &str,
        relationship: &str,
        options: &ListOptions<F>,
    ) -> Result<LinkagesResponse> {
        let first = self.linkages(ctx, id, relationship, options).await?;
        self.client.paginate(ctx, first).await
    }

    /// Replaces the full membership of a to-many relationship.
    pub async fn replace_linkages(
        &self,
        ctx: &CallContext,
        id: &str,
        relationship: &str,
        refs: &[ResourceRef],
    ) -> Result<Empty> {
        let path = Self::relationship_path(id, relationship)?;
        self.client
            .do_write(ctx, Method::PATCH, &path, Some(&linkage_body(refs)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_trimmed_and_required() {
        assert_eq!(required_id("app", "  123 ").unwrap(), "123");
        assert!(matches!(
            required_id("app", "   "),
            Err(AscError::InvalidArgument(msg)) if msg == "app id is required"
        ));
        assert!(required_id("app", "../apps").is_err());
        assert!(required_id("app", "1?include=x").is_err());
    }

    #[test]
    fn item_paths_use_the_collection() {
        assert_eq!(
            Resources::<webhooks::Webhooks>::item_path(" wh-1 ").unwrap(),
            "v1/webhooks/wh-1"
        );
        assert_eq!(
            Resources::<apps::Apps>::relationship_path("A", "webhooks").unwrap(),
            "v1/apps/A/relationships/webhooks"
        );
    }
}
