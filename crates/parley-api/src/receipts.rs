use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;

use parley_gateway::Identity;
use parley_gateway::dispatcher::Exclude;
use parley_types::events::ServerEvent;
use parley_types::models::{MessageId, MessageStatus, Room};

use crate::error::ApiResult;
use crate::state::AppState;

/// Record that the caller read a message. Repeat reads refresh `readAt`; the
/// message itself moves to `seen`.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let message = state.member_message(message_id, identity.user_id).await?;

    let user_id = identity.user_id;
    let receipt = state
        .db(move |db| db.mark_read(message_id, user_id, Utc::now()))
        .await?;

    let room = Room::Chat(message.chat_id);
    let event = ServerEvent::MessageRead {
        chat_id: message.chat_id,
        message_id,
        user_id,
        read_at: receipt.read_at,
    };
    state.dispatcher.publish(&room, event, Exclude::Nobody).await;

    if message.status < MessageStatus::Seen {
        let event = ServerEvent::MessageStatusChanged {
            chat_id: message.chat_id,
            message_id,
            status: MessageStatus::Seen,
        };
        state.dispatcher.publish(&room, event, Exclude::Nobody).await;
    }

    Ok(Json(receipt))
}

pub async fn list_reads(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state.member_message(message_id, identity.user_id).await?;
    let receipts = state.db(move |db| db.read_receipts(message_id)).await?;
    Ok(Json(receipts))
}
