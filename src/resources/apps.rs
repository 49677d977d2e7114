use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_locale: Option<String>,
}

resource_family! {
    Apps {
        type: "apps",
        path: "v1/apps",
        attributes: AppAttributes,
        filters: ["bundleId", "id", "name", "sku", "appStoreVersions.platform"],
        includes: ["appInfos", "appStoreVersions", "builds", "gameCenterDetail", "webhooks"],
        sorts: ["bundleId", "name", "sku"],
        fields: ["appInfos", "appStoreVersions", "builds", "gameCenterDetails", "webhooks"],
    }
}
