//! Typed query options and their wire form (`limit`, `filter[..]`, `fields[..]`, `include`, `sort`).

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use url::{Url, form_urlencoded};

use crate::error::{AscError, Result};
use crate::resources::ResourceFamily;

/// Wire-level query parameters; one value per key, the last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBag(BTreeMap<String, String>);

impl QueryBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn encode(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.0 {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        Self(
            form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    /// Replaces the query of `url` (cleared when the bag is empty).
    pub fn apply_to(&self, url: &mut Url) {
        if self.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&self.encode()));
        }
    }
}

/// Where a list request goes: a server-issued continuation, or a fresh query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListTarget {
    Next(String),
    Query(QueryBag),
}

fn csv(values: &[String]) -> String {
    values.join(",")
}

fn clean<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// List options recognized by resource family `F`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions<F> {
    limit: Option<u32>,
    next_url: Option<String>,
    filters: BTreeMap<String, Vec<String>>,
    include: Vec<String>,
    fields: BTreeMap<String, Vec<String>>,
    sort: Option<String>,
    family: PhantomData<fn() -> F>,
}

impl<F> Default for ListOptions<F> {
    fn default() -> Self {
        Self {
            limit: None,
            next_url: None,
            filters: BTreeMap::new(),
            include: Vec::new(),
            fields: BTreeMap::new(),
            sort: None,
            family: PhantomData,
        }
    }
}

impl<F: ResourceFamily> ListOptions<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `0` leaves the server default in place.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    /// A non-empty URL bypasses every other option.
    pub fn next_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        self.next_url = (!url.is_empty()).then_some(url);
        self
    }

    /// OR within a field; separate fields AND together.
    pub fn filter<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = clean(values);
        if values.is_empty() {
            self.filters.remove(field);
        } else {
            self.filters.insert(field.to_string(), values);
        }
        self
    }

    pub fn include<I, S>(mut self, relationships: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.include = clean(relationships);
        self
    }

    pub fn fields<I, S>(mut self, type_tag: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = clean(fields);
        if fields.is_empty() {
            self.fields.remove(type_tag);
        } else {
            self.fields.insert(type_tag.to_string(), fields);
        }
        self
    }

    /// A leading `-` sorts descending.
    pub fn sort(mut self, spec: &str) -> Self {
        let spec = spec.trim();
        self.sort = (!spec.is_empty()).then(|| spec.to_string());
        self
    }

    pub fn next(&self) -> Option<&str> {
        self.next_url.as_deref()
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    pub fn target(&self) -> Result<ListTarget> {
        match &self.next_url {
            Some(url) => Ok(ListTarget::Next(url.clone())),
            None => self.to_query().map(ListTarget::Query),
        }
    }

    /// Query for list endpoints. The next URL is not part of it.
    pub fn to_query(&self) -> Result<QueryBag> {
        let mut bag = self.to_detail_query()?;
        if let Some(limit) = self.limit {
            bag.set("limit", limit.to_string());
        }
        for (field, values) in &self.filters {
            if !F::FILTERS.contains(&field.as_str()) {
                return Err(unrecognized::<F>("filter", field, F::FILTERS));
            }
            bag.set(format!("filter[{field}]"), csv(values));
        }
        if let Some(sort) = &self.sort {
            for key in sort.split(',').map(str::trim) {
                let bare = key.strip_prefix('-').unwrap_or(key);
                if !F::SORTS.contains(&bare) {
                    return Err(unrecognized::<F>("sort", key, F::SORTS));
                }
            }
            bag.set("sort", sort.clone());
        }
        Ok(bag)
    }

    /// Query for single-resource endpoints: only `include` and `fields[..]` apply.
    pub fn to_detail_query(&self) -> Result<QueryBag> {
        let mut bag = QueryBag::new();
        if !self.include.is_empty() {
            if let Some(rel) = self
                .include
                .iter()
                .find(|rel| !F::INCLUDES.contains(&rel.as_str()))
            {
                return Err(unrecognized::<F>("include", rel, F::INCLUDES));
            }
            bag.set("include", csv(&self.include));
        }
        for (type_tag, fields) in &self.fields {
            if type_tag != F::TYPE && !F::FIELD_TYPES.contains(&type_tag.as_str()) {
                return Err(AscError::InvalidArgument(format!(
                    "fields[{type_tag}] is not supported for {}",
                    F::TYPE
                )));
            }
            bag.set(format!("fields[{type_tag}]"), csv(fields));
        }
        Ok(bag)
    }
}

fn unrecognized<F: ResourceFamily>(option: &str, value: &str, allowed: &[&str]) -> AscError {
    if allowed.is_empty() {
        AscError::InvalidArgument(format!("{} does not support {option} options", F::TYPE))
    } else {
        AscError::InvalidArgument(format!(
            "{option} {value:?} is not supported for {}; expected one of: {}",
            F::TYPE,
            allowed.join(", ")
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    OneDay,
    OneHour,
    FifteenMinutes,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneDay => "P1D",
            Self::OneHour => "PT1H",
            Self::FifteenMinutes => "PT15M",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = AscError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P1D" => Ok(Self::OneDay),
            "PT1H" => Ok(Self::OneHour),
            "PT15M" => Ok(Self::FifteenMinutes),
            other => Err(AscError::InvalidArgument(format!(
                "granularity {other:?} must be one of P1D, PT1H, PT15M"
            ))),
        }
    }
}

/// Options for Game Center metrics endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsOptions {
    limit: Option<u32>,
    next_url: Option<String>,
    granularity: Option<Granularity>,
    group_by: Vec<String>,
    filters: BTreeMap<String, Vec<String>>,
    sort: Option<String>,
}

impl MetricsOptions {
    pub const FILTERS: &'static [&'static str] =
        &["result", "gameCenterDetail", "gameCenterMatchmakingQueue"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn next_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim().to_string();
        self.next_url = (!url.is_empty()).then_some(url);
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.group_by = clean(fields);
        self
    }

    pub fn filter<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = clean(values);
        if values.is_empty() {
            self.filters.remove(field);
        } else {
            self.filters.insert(field.to_string(), values);
        }
        self
    }

    pub fn sort(mut self, spec: &str) -> Self {
        let spec = spec.trim();
        self.sort = (!spec.is_empty()).then(|| spec.to_string());
        self
    }

    pub fn target(&self) -> Result<ListTarget> {
        if let Some(url) = &self.next_url {
            return Ok(ListTarget::Next(url.clone()));
        }
        let mut bag = QueryBag::new();
        if let Some(limit) = self.limit {
            bag.set("limit", limit.to_string());
        }
        if let Some(granularity) = self.granularity {
            bag.set("granularity", granularity.as_str());
        }
        if !self.group_by.is_empty() {
            bag.set("groupBy", csv(&self.group_by));
        }
        for (field, values) in &self.filters {
            if !Self::FILTERS.contains(&field.as_str()) {
                return Err(AscError::InvalidArgument(format!(
                    "metrics filter {field:?} must be one of: {}",
                    Self::FILTERS.join(", ")
                )));
            }
            bag.set(format!("filter[{field}]"), csv(values));
        }
        if let Some(sort) = &self.sort {
            bag.set("sort", sort.clone());
        }
        Ok(ListTarget::Query(bag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::webhooks::Webhooks;

    #[test]
    fn builds_wire_query() {
        let bag = ListOptions::<Webhooks>::new()
            .limit(5)
            .fields("webhooks", ["name", "url"])
            .fields("apps", ["name"])
            .include(["app"])
            .to_query()
            .unwrap();
        assert_eq!(bag.get("limit"), Some("5"));
        assert_eq!(bag.get("fields[webhooks]"), Some("name,url"));
        assert_eq!(bag.get("fields[apps]"), Some("name"));
        assert_eq!(bag.get("include"), Some("app"));
    }

    #[test]
    fn zero_limit_is_unset_and_last_write_wins() {
        let bag = ListOptions::<Webhooks>::new()
            .limit(50)
            .limit(0)
            .include(["app"])
            .include(Vec::<String>::new())
            .to_query()
            .unwrap();
        assert!(bag.is_empty());

        let bag = ListOptions::<Webhooks>::new()
            .limit(1)
            .limit(200)
            .to_query()
            .unwrap();
        assert_eq!(bag.get("limit"), Some("200"));
    }

    #[test]
    fn next_url_is_exclusive() {
        let target = ListOptions::<Webhooks>::new()
            .limit(10)
            .include(["app"])
            .next_url(" https://api.appstoreconnect.apple.com/v1/apps/1/webhooks?cursor=abc ")
            .target()
            .unwrap();
        assert_eq!(
            target,
            ListTarget::Next("https://api.appstoreconnect.apple.com/v1/apps/1/webhooks?cursor=abc".into())
        );
    }

    #[test]
    fn unknown_include_is_rejected() {
        let err = ListOptions::<Webhooks>::new()
            .include(["builds"])
            .to_query()
            .unwrap_err();
        assert!(matches!(err, AscError::InvalidArgument(_)));
    }

    #[test]
    fn encode_parse_round_trip() {
        let bag = ListOptions::<crate::resources::apps::Apps>::new()
            .limit(2)
            .filter("bundleId", ["com.example.one", "com.example.two"])
            .filter("name", ["Demo & Co"])
            .sort("-name")
            .fields("apps", ["name", "bundleId"])
            .to_query()
            .unwrap();
        let encoded = bag.encode();
        assert!(encoded.contains("filter%5BbundleId%5D=com.example.one%2Ccom.example.two"));
        let reparsed = QueryBag::parse(&encoded);
        assert_eq!(reparsed, bag);
        assert_eq!(QueryBag::parse(&format!("?{}", reparsed.encode())), bag);
    }

    #[test]
    fn metrics_query_uses_granularity_and_group_by() {
        let target = MetricsOptions::new()
            .granularity("pt15m".parse().unwrap())
            .group_by(["result"])
            .filter("result", ["MATCHED"])
            .limit(10)
            .target()
            .unwrap();
        let ListTarget::Query(bag) = target else {
            panic!("expected a query target");
        };
        assert_eq!(bag.get("granularity"), Some("PT15M"));
        assert_eq!(bag.get("groupBy"), Some("result"));
        assert_eq!(bag.get("filter[result]"), Some("MATCHED"));
        assert!("P2D".parse::<Granularity>().is_err());
    }
}
