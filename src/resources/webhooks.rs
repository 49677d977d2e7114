use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::CallContext;
use crate::envelope::{ListResponse, Relationships, SingleResponse};
use crate::error::{AscError, Result};
use crate::query::ListOptions;
use crate::resources::{ResourceFamily, Resources, apps::Apps, required_id};

pub const EVENT_TYPES: &[&str] = &[
    "ALTERNATIVE_DISTRIBUTION_PACKAGE_AVAILABLE_UPDATED",
    "ALTERNATIVE_DISTRIBUTION_PACKAGE_VERSION_CREATED",
    "ALTERNATIVE_DISTRIBUTION_TERRITORY_AVAILABILITY_UPDATED",
    "APP_STORE_VERSION_APP_VERSION_STATE_UPDATED",
    "BACKGROUND_ASSET_VERSION_APP_STORE_RELEASE_STATE_UPDATED",
    "BACKGROUND_ASSET_VERSION_EXTERNAL_BETA_RELEASE_STATE_UPDATED",
    "BACKGROUND_ASSET_VERSION_INTERNAL_BETA_RELEASE_CREATED",
    "BACKGROUND_ASSET_VERSION_STATE_UPDATED",
    "BETA_FEEDBACK_CRASH_SUBMISSION_CREATED",
    "BETA_FEEDBACK_SCREENSHOT_SUBMISSION_CREATED",
    "BUILD_BETA_DETAIL_EXTERNAL_BUILD_STATE_UPDATED",
    "BUILD_UPLOAD_STATE_UPDATED",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookCreate {
    pub enabled: bool,
    pub event_types: Vec<String>,
    pub name: String,
    pub secret: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDeliveryAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redelivery: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

resource_family! {
    Webhooks {
        type: "webhooks",
        path: "v1/webhooks",
        attributes: WebhookAttributes,
        includes: ["app"],
        fields: ["apps"],
    }
}

resource_family! {
    WebhookDeliveries {
        type: "webhookDeliveries",
        path: "v1/webhookDeliveries",
        attributes: WebhookDeliveryAttributes,
        filters: ["deliveryState", "createdDateGreaterThanOrEqualTo", "createdDateLessThan"],
        includes: ["event"],
        fields: ["webhookEvents"],
    }
}

resource_family! {
    WebhookPings {
        type: "webhookPings",
        path: "v1/webhookPings",
        attributes: Value,
    }
}

fn check_event_types(event_types: &[String]) -> Result<()> {
    match event_types
        .iter()
        .find(|event| !EVENT_TYPES.contains(&event.as_str()))
    {
        Some(unknown) => Err(AscError::InvalidArgument(format!(
            "unknown webhook event type {unknown:?}"
        ))),
        None => Ok(()),
    }
}

impl Resources<'_, Webhooks> {
    pub async fn list_for_app(
        &self,
        ctx: &CallContext,
        app_id: &str,
        options: &ListOptions<Webhooks>,
    ) -> Result<ListResponse<WebhookAttributes>> {
        let path = format!("{}/{}/webhooks", Apps::COLLECTION, required_id("app", app_id)?);
        self.list_at(ctx, &path, options).await
    }

    pub async fn list_all_for_app(
        &self,
        ctx: &CallContext,
        app_id: &str,
        options: &ListOptions<Webhooks>,
    ) -> Result<ListResponse<WebhookAttributes>> {
        let path = format!("{}/{}/webhooks", Apps::COLLECTION, required_id("app", app_id)?);
        self.list_all_at(ctx, &path, options).await
    }

    pub async fn create_for_app(
        &self,
        ctx: &CallContext,
        app_id: &str,
        webhook: &WebhookCreate,
    ) -> Result<SingleResponse<WebhookAttributes>> {
        let app_id = required_id("app", app_id)?;
        check_event_types(&webhook.event_types)?;
        let relationships = Relationships::new().to_one("app", Apps::TYPE, app_id);
        self.create(ctx, Some(webhook), relationships).await
    }

    pub async fn modify(
        &self,
        ctx: &CallContext,
        id: &str,
        update: &WebhookUpdate,
    ) -> Result<SingleResponse<WebhookAttributes>> {
        if let Some(event_types) = &update.event_types {
            check_event_types(event_types)?;
        }
        self.update(ctx, id, Some(update), None).await
    }

    /// Sends a test event to the webhook's URL.
    pub async fn ping(&self, ctx: &CallContext, id: &str) -> Result<SingleResponse<Value>> {
        let id = required_id(Webhooks::TYPE, id)?;
        let relationships = Relationships::new().to_one("webhook", Webhooks::TYPE, id);
        self.client()
            .resources::<WebhookPings>()
            .create::<()>(ctx, None, relationships)
            .await
    }
}

impl Resources<'_, WebhookDeliveries> {
    pub async fn list_for_webhook(
        &self,
        ctx: &CallContext,
        webhook_id: &str,
        options: &ListOptions<WebhookDeliveries>,
    ) -> Result<ListResponse<WebhookDeliveryAttributes>> {
        let path = format!(
            "{}/{}/deliveries",
            Webhooks::COLLECTION,
            required_id("webhook", webhook_id)?
        );
        self.list_at(ctx, &path, options).await
    }

    /// Re-sends a past delivery, using it as the template for a new one.
    pub async fn redeliver(
        &self,
        ctx: &CallContext,
        delivery_id: &str,
    ) -> Result<SingleResponse<WebhookDeliveryAttributes>> {
        let delivery_id = required_id("delivery", delivery_id)?;
        let relationships =
            Relationships::new().to_one("template", WebhookDeliveries::TYPE, delivery_id);
        self.create::<()>(ctx, None, relationships).await
    }
}
