use thiserror::Error;

use parley_types::events::{ErrorCode, ServerEvent};
use parley_types::models::{ChatId, SessionId};

/// Why an inbound gateway event was rejected.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not a member of chat {0}")]
    NotMember(ChatId),

    #[error("session has not joined {0}")]
    NotInRoom(String),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("storage unavailable: {0}")]
    Storage(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::UnknownSession(_) => ErrorCode::Authentication,
            GatewayError::NotMember(_) | GatewayError::NotInRoom(_) => ErrorCode::Authorization,
            GatewayError::Storage(_) => ErrorCode::Storage,
        }
    }

    /// The `error` event sent back to the offending session.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}
