use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::envelope::{LinkagesResponse, Relationships, SingleResponse};
use crate::error::Result;
use crate::query::ListOptions;
use crate::resources::Resources;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassTypeIdAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PassTypeIdUpdate {
    pub name: Option<String>,
}

resource_family! {
    PassTypeIds {
        type: "passTypeIds",
        path: "v1/passTypeIds",
        attributes: PassTypeIdAttributes,
        filters: ["id", "identifier", "name"],
        includes: ["certificates"],
        sorts: ["id", "identifier", "name"],
        fields: ["certificates"],
    }
}

impl Resources<'_, PassTypeIds> {
    pub async fn register(
        &self,
        ctx: &CallContext,
        name: &str,
        identifier: &str,
    ) -> Result<SingleResponse<PassTypeIdAttributes>> {
        let attributes = PassTypeIdAttributes {
            name: name.trim().to_string(),
            identifier: identifier.trim().to_string(),
        };
        self.create(ctx, Some(&attributes), Relationships::new()).await
    }

    pub async fn rename(
        &self,
        ctx: &CallContext,
        id: &str,
        name: &str,
    ) -> Result<SingleResponse<PassTypeIdAttributes>> {
        let update = PassTypeIdUpdate {
            name: Some(name.trim().to_string()),
        };
        self.update(ctx, id, Some(&update), None).await
    }

    pub async fn certificate_linkages(
        &self,
        ctx: &CallContext,
        id: &str,
        options: &ListOptions<PassTypeIds>,
    ) -> Result<LinkagesResponse> {
        self.linkages(ctx, id, "certificates", options).await
    }
}
