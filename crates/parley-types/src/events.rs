use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::MessageView;
use crate::models::{ChatId, MessageId, MessageStatus, SessionId, UserId};

/// Error kinds shared by the HTTP surface and the gateway `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Authentication,
    Authorization,
    NotFound,
    Validation,
    Storage,
}

/// Events sent FROM client TO server over the WebSocket gateway.
///
/// Identity fields are never read from the client: the server stamps the
/// authenticated user and session onto everything it forwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Join a chat room (requires chat membership)
    #[serde(rename = "join")]
    Join { chat_id: ChatId },

    #[serde(rename = "leave")]
    Leave { chat_id: ChatId },

    /// Opaque message fanout to a joined chat room
    #[serde(rename = "message")]
    Message { chat_id: ChatId, message: Value },

    #[serde(rename = "typing")]
    Typing { chat_id: ChatId, is_typing: bool },

    #[serde(rename = "status")]
    Status {
        chat_id: ChatId,
        message_id: MessageId,
        status: MessageStatus,
    },

    #[serde(rename = "call:join")]
    CallJoin { room_id: String },

    #[serde(rename = "call:leave")]
    CallLeave { room_id: String },

    #[serde(rename = "call:offer")]
    CallOffer {
        room_id: String,
        payload: Value,
        to: SessionId,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        room_id: String,
        payload: Value,
        to: SessionId,
    },

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        room_id: String,
        payload: Value,
        to: SessionId,
    },

    #[serde(rename = "video:join")]
    VideoJoin { room_id: String },

    #[serde(rename = "video:leave")]
    VideoLeave { room_id: String },

    #[serde(rename = "video:screen-share-start")]
    ScreenShareStart { room_id: String },

    #[serde(rename = "video:screen-share-stop")]
    ScreenShareStop { room_id: String },

    /// Multi-party signaling: targeted when `to` is set, room-wide otherwise
    #[serde(rename = "video:signal")]
    VideoSignal {
        room_id: String,
        signal: Value,
        #[serde(default)]
        to: Option<SessionId>,
    },
}

/// Events sent FROM server TO clients over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { session_id: SessionId, user_id: UserId },

    /// An inbound event was rejected
    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },

    #[serde(rename = "message")]
    Message {
        chat_id: ChatId,
        from: UserId,
        message: Value,
    },

    #[serde(rename = "typing")]
    Typing {
        chat_id: ChatId,
        user_id: UserId,
        is_typing: bool,
    },

    #[serde(rename = "status")]
    Status {
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
        status: MessageStatus,
    },

    /// A message was persisted (HTTP send, batch ingest, scheduled delivery)
    #[serde(rename = "message:created")]
    MessageCreated { message: MessageView },

    #[serde(rename = "message:edited")]
    MessageEdited {
        chat_id: ChatId,
        message_id: MessageId,
        payload: String,
        edited_at: DateTime<Utc>,
    },

    #[serde(rename = "message:deleted")]
    MessageDeleted { chat_id: ChatId, message_id: MessageId },

    #[serde(rename = "message:status")]
    MessageStatusChanged {
        chat_id: ChatId,
        message_id: MessageId,
        status: MessageStatus,
    },

    #[serde(rename = "message:reaction")]
    ReactionAdded {
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },

    #[serde(rename = "message:reaction-removed")]
    ReactionRemoved {
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
    },

    #[serde(rename = "message:read")]
    MessageRead {
        chat_id: ChatId,
        message_id: MessageId,
        user_id: UserId,
        read_at: DateTime<Utc>,
    },

    /// Delivered on the mentioned user's own channel
    #[serde(rename = "message:mention")]
    Mention {
        chat_id: ChatId,
        message_id: MessageId,
        mentioned_by: UserId,
    },

    #[serde(rename = "chat:last-seen")]
    LastSeen {
        chat_id: ChatId,
        user_id: UserId,
        last_seen: DateTime<Utc>,
    },

    #[serde(rename = "call:user-joined")]
    CallUserJoined {
        room_id: String,
        user_id: UserId,
        session_id: SessionId,
    },

    #[serde(rename = "call:user-left")]
    CallUserLeft {
        room_id: String,
        user_id: UserId,
        session_id: SessionId,
    },

    #[serde(rename = "call:offer")]
    CallOffer {
        room_id: String,
        payload: Value,
        from: SessionId,
        from_user_id: UserId,
        to: SessionId,
    },

    #[serde(rename = "call:answer")]
    CallAnswer {
        room_id: String,
        payload: Value,
        from: SessionId,
        from_user_id: UserId,
        to: SessionId,
    },

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate {
        room_id: String,
        payload: Value,
        from: SessionId,
        from_user_id: UserId,
        to: SessionId,
    },

    #[serde(rename = "video:user-joined")]
    VideoUserJoined {
        room_id: String,
        user_id: UserId,
        session_id: SessionId,
    },

    #[serde(rename = "video:user-left")]
    VideoUserLeft {
        room_id: String,
        user_id: UserId,
        session_id: SessionId,
    },

    #[serde(rename = "video:screen-share-start")]
    ScreenShareStart {
        room_id: String,
        user_id: UserId,
        session_id: SessionId,
    },

    #[serde(rename = "video:screen-share-stop")]
    ScreenShareStop {
        room_id: String,
        user_id: UserId,
        session_id: SessionId,
    },

    #[serde(rename = "video:signal")]
    VideoSignal {
        room_id: String,
        signal: Value,
        from: SessionId,
        from_user_id: UserId,
        to: Option<SessionId>,
    },
}

impl ServerEvent {
    /// Wire name of the event, used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Error { .. } => "error",
            Self::Message { .. } => "message",
            Self::Typing { .. } => "typing",
            Self::Status { .. } => "status",
            Self::MessageCreated { .. } => "message:created",
            Self::MessageEdited { .. } => "message:edited",
            Self::MessageDeleted { .. } => "message:deleted",
            Self::MessageStatusChanged { .. } => "message:status",
            Self::ReactionAdded { .. } => "message:reaction",
            Self::ReactionRemoved { .. } => "message:reaction-removed",
            Self::MessageRead { .. } => "message:read",
            Self::Mention { .. } => "message:mention",
            Self::LastSeen { .. } => "chat:last-seen",
            Self::CallUserJoined { .. } => "call:user-joined",
            Self::CallUserLeft { .. } => "call:user-left",
            Self::CallOffer { .. } => "call:offer",
            Self::CallAnswer { .. } => "call:answer",
            Self::CallIceCandidate { .. } => "call:ice-candidate",
            Self::VideoUserJoined { .. } => "video:user-joined",
            Self::VideoUserLeft { .. } => "video:user-left",
            Self::ScreenShareStart { .. } => "video:screen-share-start",
            Self::ScreenShareStop { .. } => "video:screen-share-stop",
            Self::VideoSignal { .. } => "video:signal",
        }
    }
}
