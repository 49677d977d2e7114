//! Aggregation of `links.next` chains into a single response.

use std::collections::HashSet;
use std::future::Future;

use tracing::debug;

use crate::context::CallContext;
use crate::envelope::{Document, IncludedResource, Links, Meta, ResourceRef};
use crate::error::{AscError, Result};

/// Upper bound on pages walked before the server is presumed to loop.
pub const DEFAULT_MAX_PAGES: usize = 10_000;

/// The pieces of one page a walk needs to pull apart and reassemble.
#[derive(Debug, Clone)]
pub struct PageParts<T> {
    pub data: Vec<T>,
    pub included: Vec<IncludedResource>,
    pub links: Links,
    pub meta: Option<Meta>,
}

/// A list envelope that can be walked page by page.
pub trait Paginated: Sized {
    type Item;

    fn next_link(&self) -> Option<&str>;
    fn into_parts(self) -> PageParts<Self::Item>;
    fn from_parts(parts: PageParts<Self::Item>) -> Self;
}

impl<T> Paginated for Document<Vec<T>> {
    type Item = T;

    fn next_link(&self) -> Option<&str> {
        self.links.next_url()
    }

    fn into_parts(self) -> PageParts<T> {
        PageParts {
            data: self.data,
            included: self.included,
            links: self.links,
            meta: self.meta,
        }
    }

    fn from_parts(parts: PageParts<T>) -> Self {
        Document {
            data: parts.data,
            included: parts.included,
            links: parts.links,
            meta: parts.meta,
        }
    }
}

pub async fn paginate_all<P, F, Fut>(ctx: &CallContext, first: P, fetch_next: F) -> Result<P>
where
    P: Paginated,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P>>,
{
    paginate_all_with_limit(ctx, first, DEFAULT_MAX_PAGES, fetch_next).await
}

/// Follows `links.next` from `first`, fetching pages one after another.
///
/// Items keep server order, `included` is de-duplicated by `(type, id)` with the
/// first occurrence kept, links come from the first page without `next`, and
/// meta comes from the last page. Any failed page aborts the walk and nothing
/// accumulated so far is returned.
pub async fn paginate_all_with_limit<P, F, Fut>(
    ctx: &CallContext,
    first: P,
    max_pages: usize,
    mut fetch_next: F,
) -> Result<P>
where
    P: Paginated,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<P>>,
{
    let mut next = first.next_link().map(str::to_string);
    let mut first = first.into_parts();
    first.links.next = None;
    if next.is_none() {
        return Ok(P::from_parts(first));
    }

    let PageParts {
        mut data,
        included: first_included,
        links,
        mut meta,
    } = first;
    let mut seen = HashSet::new();
    let mut included = Vec::new();
    absorb(&mut seen, &mut included, first_included);

    let mut followed = HashSet::new();
    let mut pages = 1usize;
    while let Some(url) = next.take() {
        if !followed.insert(url.clone()) {
            return Err(AscError::protocol(
                "pagination_repeated_url",
                format!("server repeated a next link after {pages} pages"),
            ));
        }
        if pages >= max_pages {
            return Err(AscError::protocol(
                "pagination_runaway",
                format!("gave up after {max_pages} pages"),
            ));
        }
        ctx.check()?;
        pages += 1;

        let page = fetch_next(url).await.map_err(|err| AscError::Paginate {
            page: pages,
            source: Box::new(err),
        })?;
        next = page.next_link().map(str::to_string);
        let parts = page.into_parts();
        data.extend(parts.data);
        absorb(&mut seen, &mut included, parts.included);
        meta = parts.meta;
        debug!(page = pages, items = data.len(), "fetched page");
    }

    Ok(P::from_parts(PageParts {
        data,
        included,
        links,
        meta,
    }))
}

fn absorb(
    seen: &mut HashSet<ResourceRef>,
    into: &mut Vec<IncludedResource>,
    page: Vec<IncludedResource>,
) {
    for resource in page {
        if seen.insert(resource.reference()) {
            into.push(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use serde_json::json;

    use super::*;
    use crate::envelope::{ListResponse, Resource};
    use crate::error::ErrorKind;

    fn item(type_tag: &str, id: &str) -> Resource {
        Resource {
            type_tag: type_tag.into(),
            id: id.into(),
            attributes: json!({}),
            relationships: None,
            links: None,
        }
    }

    fn page(ids: &[&str], next: Option<&str>, included: &[(&str, &str)]) -> ListResponse {
        let mut doc = Document::new(ids.iter().map(|id| item("apps", id)).collect::<Vec<_>>());
        doc.included = included.iter().map(|(t, id)| item(t, id)).collect();
        doc.links.self_link = Some("https://api.example.com/v1/apps".into());
        doc.links.next = next.map(str::to_string);
        doc
    }

    fn ids(doc: &ListResponse) -> Vec<&str> {
        doc.data.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn single_page_is_returned_as_is() {
        let first = page(&["A", "B"], None, &[("builds", "b1"), ("builds", "b1")]);
        let out = paginate_all(&CallContext::new(), first.clone(), |_| {
            ready(Err::<ListResponse, _>(AscError::protocol("unexpected", "no fetch")))
        })
        .await
        .unwrap();
        assert_eq!(out, first);
    }

    #[tokio::test]
    async fn pages_concatenate_in_order_and_dedupe_included() {
        let first = page(&["A", "B"], Some("https://x/p2"), &[("builds", "b1")]);
        let mut pages = vec![
            page(&["E"], None, &[("builds", "b2")]),
            page(&["C", "D"], Some("https://x/p3"), &[("builds", "b1"), ("builds", "b2")]),
        ];
        let mut requested = Vec::new();
        let out = paginate_all(&CallContext::new(), first, |url| {
            requested.push(url);
            ready(pages.pop().ok_or_else(|| AscError::protocol("unexpected", "out of pages")))
        })
        .await
        .unwrap();
        assert_eq!(ids(&out), ["A", "B", "C", "D", "E"]);
        assert_eq!(requested, ["https://x/p2", "https://x/p3"]);
        let included: Vec<_> = out.included.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(included, ["b1", "b2"]);
        assert_eq!(out.links.next, None);
        assert_eq!(out.links.self_link.as_deref(), Some("https://api.example.com/v1/apps"));
    }

    #[tokio::test]
    async fn meta_comes_from_last_page() {
        let mut first = page(&["A"], Some("https://x/p2"), &[]);
        first.meta = Some(serde_json::from_value(json!({"paging": {"total": 1}})).unwrap());
        let mut last = page(&["B"], None, &[]);
        last.meta = Some(serde_json::from_value(json!({"paging": {"total": 2}})).unwrap());
        let out = paginate_all(&CallContext::new(), first, |_| ready(Ok(last.clone())))
            .await
            .unwrap();
        assert_eq!(out.meta.unwrap().paging.unwrap().total, Some(2));
    }

    #[tokio::test]
    async fn failing_page_surfaces_its_error_only() {
        let first = page(&["A"], Some("https://x/p2"), &[]);
        let mut calls = 0;
        let err = paginate_all(&CallContext::new(), first, |_| {
            calls += 1;
            if calls == 1 {
                ready(Ok(page(&["B"], Some("https://x/p3"), &[])))
            } else {
                ready(Err(AscError::network("reset")))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::Paginate { page: 3, .. }));
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn repeated_next_link_aborts() {
        let first = page(&["A"], Some("https://x/loop"), &[]);
        let err = paginate_all(&CallContext::new(), first, |_| {
            ready(Ok(page(&["B"], Some("https://x/loop"), &[])))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::Protocol { kind: "pagination_repeated_url", .. }));
    }

    #[tokio::test]
    async fn page_cap_stops_runaway_walks() {
        let first = page(&["0"], Some("https://x/1"), &[]);
        let mut n = 1;
        let err = paginate_all_with_limit(&CallContext::new(), first, 3, |_| {
            n += 1;
            ready(Ok(page(&["x"], Some(format!("https://x/{n}").as_str()), &[])))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, AscError::Protocol { kind: "pagination_runaway", .. }));
    }

    #[tokio::test]
    async fn canceled_context_stops_before_next_fetch() {
        let ctx = CallContext::new();
        ctx.cancel();
        let first = page(&["A"], Some("https://x/p2"), &[]);
        let err = paginate_all(&ctx, first, |_| ready(Ok(page(&["B"], None, &[]))))
            .await
            .unwrap_err();
        assert!(matches!(err, AscError::Canceled));
    }
}
