//! JSON:API-style envelopes exchanged with App Store Connect.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{AscError, Result};

/// Largest slice of an undecodable body kept for diagnostics.
pub const MAX_BODY_SNIPPET: usize = 2048;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<String>,
}

impl Links {
    /// The continuation URL, ignoring blank values.
    pub fn next_url(&self) -> Option<&str> {
        self.next
            .as_deref()
            .map(str::trim)
            .filter(|next| !next.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A `(type, id)` linkage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub id: String,
}

impl ResourceRef {
    pub fn new(type_tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "A: Serialize",
    deserialize = "A: DeserializeOwned + Default"
))]
pub struct Resource<A = Value> {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub id: String,
    #[serde(default)]
    pub attributes: A,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
}

impl<A> Resource<A> {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.type_tag.clone(), self.id.clone())
    }
}

/// Side-loaded resources keep their attributes untyped.
pub type IncludedResource = Resource<Value>;

/// Server envelope: `{ data, included?, links?, meta? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "D: Serialize",
    deserialize = "D: DeserializeOwned"
))]
pub struct Document<D> {
    pub data: D,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<IncludedResource>,
    #[serde(default)]
    pub links: Links,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<D> Document<D> {
    pub fn new(data: D) -> Self {
        Self {
            data,
            included: Vec::new(),
            links: Links::default(),
            meta: None,
        }
    }
}

pub type ListResponse<A = Value> = Document<Vec<Resource<A>>>;
pub type SingleResponse<A = Value> = Document<Resource<A>>;
pub type LinkagesResponse = Document<Vec<ResourceRef>>;

/// Successful response without a payload (deletes, relationship updates, chunk transfers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Empty;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
}

impl fmt::Display for ApiErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.title.as_deref(), self.detail.as_deref()) {
            (Some(title), Some(detail)) => write!(f, "{title}: {detail}"),
            (Some(text), None) | (None, Some(text)) => f.write_str(text),
            (None, None) => f.write_str(self.code.as_deref().unwrap_or("unknown error")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorDocument {
    #[serde(default)]
    pub errors: Vec<ApiErrorObject>,
}

/// Bounded, lossy rendering of a body for error reports.
pub fn body_snippet(body: &[u8]) -> String {
    let end = body.len().min(MAX_BODY_SNIPPET);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// Decoding of a successful (2xx) response body.
pub trait ResponseBody: Sized {
    fn decode(body: &[u8]) -> Result<Self>;
}

impl ResponseBody for Empty {
    fn decode(_body: &[u8]) -> Result<Self> {
        Ok(Empty)
    }
}

impl<D: DeserializeOwned> ResponseBody for Document<D> {
    fn decode(body: &[u8]) -> Result<Self> {
        decode_json(body)
    }
}

impl ResponseBody for Value {
    fn decode(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        decode_json(body)
    }
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AscError::Protocol {
            kind: "empty_body",
            message: "expected a JSON document but the response body was empty".into(),
            body: None,
        });
    }
    serde_json::from_slice(body).map_err(|err| AscError::Protocol {
        kind: "decode",
        message: format!("failed to parse response: {err}"),
        body: Some(body_snippet(body)),
    })
}

/// Builder for the `relationships` object of create requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relationships(Map<String, Value>);

impl Relationships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_one(mut self, name: &str, type_tag: &str, id: &str) -> Self {
        self.0.insert(
            name.to_string(),
            json!({ "data": ResourceRef::new(type_tag, id.trim()) }),
        );
        self
    }

    pub fn to_many<I, S>(mut self, name: &str, type_tag: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let data: Vec<ResourceRef> = ids
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .map(|id| ResourceRef::new(type_tag, id))
            .collect();
        self.0.insert(name.to_string(), json!({ "data": data }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

/// `{ "data": { "type", "id"?, "attributes"?, "relationships"? } }`
pub fn resource_body<A: Serialize>(
    type_tag: &str,
    id: Option<&str>,
    attributes: Option<&A>,
    relationships: Option<Relationships>,
) -> Result<Value> {
    let mut data = Map::new();
    data.insert("type".into(), Value::String(type_tag.to_string()));
    if let Some(id) = id {
        data.insert("id".into(), Value::String(id.to_string()));
    }
    if let Some(attributes) = attributes {
        let value = serde_json::to_value(attributes).map_err(|err| {
            AscError::InvalidArgument(format!("attributes for {type_tag} are not serializable: {err}"))
        })?;
        data.insert("attributes".into(), value);
    }
    if let Some(relationships) = relationships.filter(|r| !r.is_empty()) {
        data.insert("relationships".into(), Value::Object(relationships.into_map()));
    }
    Ok(json!({ "data": data }))
}

/// `{ "data": [ {type, id}, ... ] }` for to-many relationship replacement.
pub fn linkage_body(refs: &[ResourceRef]) -> Value {
    json!({ "data": refs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_document_keeps_links_and_meta() {
        let body = br#"{
            "data": [{"type":"apps","id":"A","attributes":{"name":"Demo"}}],
            "included": [{"type":"builds","id":"b1"}],
            "links": {"self":"https://x/v1/apps","next":"https://x/v1/apps?cursor=X"},
            "meta": {"paging": {"total": 3, "limit": 1}}
        }"#;
        let doc: ListResponse = ResponseBody::decode(body).unwrap();
        assert_eq!(doc.data[0].id, "A");
        assert_eq!(doc.data[0].attributes["name"], "Demo");
        assert_eq!(doc.included[0].reference(), ResourceRef::new("builds", "b1"));
        assert_eq!(doc.links.next_url(), Some("https://x/v1/apps?cursor=X"));
        assert_eq!(doc.meta.unwrap().paging.unwrap().total, Some(3));
    }

    #[test]
    fn blank_next_link_is_absent() {
        let links = Links {
            next: Some("   ".into()),
            ..Links::default()
        };
        assert_eq!(links.next_url(), None);
    }

    #[test]
    fn empty_body_is_protocol_error_for_documents() {
        let err = <ListResponse as ResponseBody>::decode(b"").unwrap_err();
        assert!(matches!(err, AscError::Protocol { kind: "empty_body", .. }));
        assert_eq!(Empty::decode(b"").unwrap(), Empty);
    }

    #[test]
    fn undecodable_body_snippet_is_bounded() {
        let body = vec![b'<'; 10_000];
        let err = <ListResponse as ResponseBody>::decode(&body).unwrap_err();
        match err {
            AscError::Protocol { body: Some(snippet), .. } => {
                assert_eq!(snippet.len(), MAX_BODY_SNIPPET)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn resource_body_omits_empty_relationships() {
        let body = resource_body(
            "webhooks",
            Some("wh-1"),
            Some(&json!({"enabled": false})),
            Some(Relationships::new()),
        )
        .unwrap();
        assert_eq!(
            body,
            json!({"data": {"type": "webhooks", "id": "wh-1", "attributes": {"enabled": false}}})
        );
    }

    #[test]
    fn to_many_relationship_skips_blank_ids() {
        let rel = Relationships::new().to_many("leaderboards", "gameCenterLeaderboards", [" a ", ""]);
        assert_eq!(
            Value::Object(rel.into_map()),
            json!({"leaderboards": {"data": [{"type": "gameCenterLeaderboards", "id": "a"}]}})
        );
    }
}
