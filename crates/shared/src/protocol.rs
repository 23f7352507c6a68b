use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{ContentKind, DeliveryStatus, MessageId, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The business side of the conversation (this client).
    Agent,
    Customer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub sender: SenderRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: DeliveryStatus,
}

/// Response shape shared by the paged history fetch and the thread search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub status: bool,
    #[serde(default)]
    pub docs: Vec<MessageDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: u32,
    pub limit: u32,
    pub sort: SortDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    pub thread_id: ThreadId,
    pub to: String,
    pub text: String,
    pub sender: String,
}

/// Query-string metadata that accompanies a raw media upload body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaMeta {
    pub thread_id: ThreadId,
    pub to: String,
    pub media_kind: ContentKind,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub sender: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageDoc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEventKind {
    NewMessage,
    MessageStatus,
    ThreadUpdated,
    Broadcast,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Inbound push notification. Payloads are not guaranteed complete, so every
/// field except the kind is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    #[serde(rename = "type", default)]
    pub kind: PushEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<ThreadId>,
}

const THREAD_ID_KEYS: &[&str] = &["threadId", "thread_id", "customerId", "customer_id"];
const CONTENT_KEYS: &[&str] = &["content", "message", "text", "body"];

impl PushEvent {
    /// Lenient decode of an arbitrary JSON event. Returns `None` for values
    /// that are not objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = object
            .get("type")
            .or_else(|| object.get("event"))
            .and_then(|kind| serde_json::from_value(kind.clone()).ok())
            .unwrap_or_default();
        let thread_id = THREAD_ID_KEYS
            .iter()
            .find_map(|key| object.get(*key))
            .and_then(scalar_to_string)
            .filter(|id| !id.trim().is_empty())
            .map(ThreadId);
        let content = CONTENT_KEYS
            .iter()
            .find_map(|key| object.get(*key))
            .and_then(|value| match value {
                Value::String(text) => Some(text.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            });

        Some(Self {
            kind,
            content,
            thread_id,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
