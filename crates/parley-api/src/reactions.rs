use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use parley_gateway::Identity;
use parley_gateway::dispatcher::Exclude;
use parley_types::api::ReactionRequest;
use parley_types::events::ServerEvent;
use parley_types::models::{MessageId, Room};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::state::AppState;

const MAX_EMOJI_BYTES: usize = 64;

fn validate_emoji(emoji: &str) -> ApiResult<()> {
    if emoji.trim().is_empty() || emoji.len() > MAX_EMOJI_BYTES {
        return Err(ApiError::Validation(format!(
            "emoji must be 1 to {} bytes",
            MAX_EMOJI_BYTES
        )));
    }
    Ok(())
}

/// React to a message. Reacting again with the same emoji only refreshes it.
pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_emoji(&req.emoji)?;
    let message = state.member_message(message_id, identity.user_id).await?;

    let user_id = identity.user_id;
    let emoji = req.emoji.clone();
    let reaction = state
        .db(move |db| db.upsert_reaction(message_id, user_id, &emoji, Utc::now()))
        .await?;

    let event = ServerEvent::ReactionAdded {
        chat_id: message.chat_id,
        message_id,
        user_id,
        emoji: req.emoji,
    };
    state
        .dispatcher
        .publish(&Room::Chat(message.chat_id), event, Exclude::Nobody)
        .await;

    Ok(Json(reaction))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_emoji(&req.emoji)?;
    let message = state.member_message(message_id, identity.user_id).await?;

    let user_id = identity.user_id;
    let emoji = req.emoji.clone();
    let removed = state
        .db(move |db| db.remove_reaction(message_id, user_id, &emoji))
        .await?;

    if removed {
        let event = ServerEvent::ReactionRemoved {
            chat_id: message.chat_id,
            message_id,
            user_id,
            emoji: req.emoji,
        };
        state
            .dispatcher
            .publish(&Room::Chat(message.chat_id), event, Exclude::Nobody)
            .await;
    }

    Ok(Json(json!({ "removed": removed })))
}

pub async fn list_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state.member_message(message_id, identity.user_id).await?;
    let reactions = state
        .db(move |db| db.reactions_for_message(message_id))
        .await?;
    Ok(Json(reactions))
}
