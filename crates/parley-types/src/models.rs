use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type UserId = Uuid;
pub type SessionId = Uuid;
pub type ChatId = i64;
pub type MessageId = i64;
pub type ScheduledId = i64;
pub type CallId = i64;

// -- Rooms --

/// A named multicast group of live sessions. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Chat(ChatId),
    Call(String),
    Video(String),
    /// Per-user notification channel (mentions and other targeted events).
    User(UserId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Chat(id) => write!(f, "chat:{}", id),
            Room::Call(id) => write!(f, "call:{}", id),
            Room::Video(id) => write!(f, "video:{}", id),
            Room::User(id) => write!(f, "user:{}", id),
        }
    }
}

// -- Enumerations stored as text --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Media,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
            Self::System => "system",
        }
    }
}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "media" => Ok(Self::Media),
            "system" => Ok(Self::System),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Delivery status of a message. Ordered: a status never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    /// Older clients report "received".
    #[serde(alias = "received")]
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    /// Numeric rank used by the store's monotonic update.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Sent => 0,
            Self::Delivered => 1,
            Self::Seen => 2,
        }
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" | "received" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Personal,
    Group,
    Project,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Group => "group",
            Self::Project => "project",
        }
    }

    /// Only group and project chats allow membership changes after creation.
    pub fn has_managed_membership(&self) -> bool {
        matches!(self, Self::Group | Self::Project)
    }
}

impl FromStr for ChatKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "group" => Ok(Self::Group),
            "project" => Ok(Self::Project),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
    Screen,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Screen => "screen",
        }
    }
}

impl FromStr for CallType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voice" => Ok(Self::Voice),
            "video" => Ok(Self::Video),
            "screen" => Ok(Self::Screen),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

// -- Stored records --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub name: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Messages stored on the server are always encrypted.
/// The payload is an opaque ciphertext blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: Vec<u8>,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub parent_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMessage {
    pub id: ScheduledId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub payload: Vec<u8>,
    pub kind: MessageKind,
    pub scheduled_for: DateTime<Utc>,
    pub delivered: bool,
    /// Set once, when the scheduled message is promoted.
    pub message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRecord {
    pub user_id: UserId,
    pub public_key: String,
    pub updated_at: DateTime<Utc>,
}

/// A call started in a chat. Signaling itself never touches the store;
/// this is the history row clients create around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: CallId,
    pub chat_id: ChatId,
    pub started_by: UserId,
    pub kind: CallType,
    /// Starter first, then invitees in the order given.
    pub participants: Vec<UserId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
