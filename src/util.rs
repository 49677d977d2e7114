use serde::Serialize;
use serde_json::Value;

use crate::envelope::Resource;

/// Most descriptive human label a resource carries, falling back to its id.
pub fn resource_name(resource: &Value) -> String {
    if let Some(attrs) = resource.get("attributes") {
        for key in [
            "name",
            "referenceName",
            "fileName",
            "identifier",
            "bundleId",
            "locale",
            "deliveryState",
        ] {
            if let Some(s) = attrs.get(key).and_then(|n| n.as_str()) {
                return s.to_string();
            }
        }
    }
    resource
        .get("id")
        .and_then(|i| i.as_str())
        .unwrap_or("<unknown>")
        .to_string()
}

pub fn resource_id(resource: &Value) -> String {
    resource
        .get("id")
        .and_then(|i| i.as_str())
        .unwrap_or("")
        .to_string()
}

/// `id<TAB>name` rows for typed resources.
pub fn resource_rows<A: Serialize>(resources: &[Resource<A>]) -> Vec<String> {
    resources
        .iter()
        .map(|resource| {
            let value = serde_json::to_value(resource).unwrap_or(Value::Null);
            format!("{}\t{}", resource.id, resource_name(&value))
        })
        .collect()
}

/// Splits a comma-separated flag value, trimming items and dropping blanks.
pub fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Page sizes the API accepts.
pub fn parse_limit(raw: &str) -> Result<u32, String> {
    match raw.trim().parse::<u32>() {
        Ok(limit) if (1..=200).contains(&limit) => Ok(limit),
        _ => Err(format!("limit must be between 1 and 200, got {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn csv_items_are_trimmed() {
        assert_eq!(split_csv(" a, b ,,c "), ["a", "b", "c"]);
        assert!(split_csv(" , ").is_empty());
    }

    #[test]
    fn limit_bounds() {
        assert_eq!(parse_limit("1"), Ok(1));
        assert_eq!(parse_limit("200"), Ok(200));
        assert!(parse_limit("0").is_err());
        assert!(parse_limit("201").is_err());
    }

    #[test]
    fn rows_use_reference_names() {
        let resource: Resource = serde_json::from_value(json!({
            "type": "gameCenterAchievements",
            "id": "ach-1",
            "attributes": {"referenceName": "First Win"}
        }))
        .unwrap();
        assert_eq!(resource_rows(&[resource]), ["ach-1\tFirst Win"]);
    }
}
