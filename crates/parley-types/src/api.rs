use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    CallType, ChatId, ChatKind, Message, MessageId, MessageKind, MessageStatus, ScheduledId,
    ScheduledMessage, UserId,
};

// -- JWT Claims --

/// JWT claims shared across parley-api (REST middleware) and parley-gateway
/// (WebSocket authentication).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Chats --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CreateChatRequest {
    #[serde(default)]
    pub kind: Option<ChatKind>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub members: Vec<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatResponse {
    pub chat_id: ChatId,
    /// False when an existing personal chat was returned instead.
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: UserId,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Base64 ciphertext
    pub payload: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    /// Users to notify on their own channel
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EditMessageRequest {
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: MessageStatus,
}

/// Wire form of a stored message. Soft-deleted messages carry no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: Option<String>,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

impl From<&Message> for MessageView {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            chat_id: m.chat_id,
            sender_id: m.sender_id,
            payload: (!m.deleted).then(|| B64.encode(&m.payload)),
            kind: m.kind,
            status: m.status,
            parent_id: m.parent_id,
            created_at: m.created_at,
            edited_at: m.edited_at,
            deleted: m.deleted,
        }
    }
}

// -- Reactions --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReactionRequest {
    pub emoji: String,
}

// -- Scheduled messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ScheduleMessageRequest {
    pub payload: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessageView {
    pub id: ScheduledId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: String,
    pub kind: MessageKind,
    pub scheduled_for: DateTime<Utc>,
    pub delivered: bool,
    pub message_id: Option<MessageId>,
}

impl From<&ScheduledMessage> for ScheduledMessageView {
    fn from(s: &ScheduledMessage) -> Self {
        Self {
            id: s.id,
            chat_id: s.chat_id,
            sender_id: s.sender_id,
            payload: B64.encode(&s.payload),
            kind: s.kind,
            scheduled_for: s.scheduled_for,
            delivered: s.delivered,
            message_id: s.message_id,
        }
    }
}

// -- Offline sync --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BatchEntry {
    pub payload: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    /// Authoring time on the offline device; server time when absent.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BatchIngestRequest {
    pub messages: Vec<BatchEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchIngestResponse {
    pub message_ids: Vec<MessageId>,
}

// -- Call history --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct StartCallRequest {
    pub kind: CallType,
    /// Invited users. Anyone outside the chat is dropped.
    #[serde(default)]
    pub participants: Vec<UserId>,
}

// -- Key directory --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SetPublicKeyRequest {
    pub public_key: String,
}
