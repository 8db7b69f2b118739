use serde::{Deserialize, Serialize};

/// Message body of a webhook event. Only `text` matters to the dispatcher;
/// the remaining content fields (images, locations, item links) ride along
/// untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One inbound messenger event as delivered to the per-account webhook
/// route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub author_id: i64,
    pub chat_id: String,
    pub chat_type: String,
    pub content: WebhookContent,
    pub created: i64,
    pub id: String,
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default)]
    pub read: Option<i64>,
    #[serde(rename = "type")]
    pub message_type: String,
    pub user_id: i64,
}

impl WebhookMessage {
    pub fn text(&self) -> &str {
        self.content.text.as_deref().unwrap_or_default()
    }
}
