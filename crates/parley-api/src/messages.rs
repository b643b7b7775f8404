use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use parley_db::NewMessage;
use parley_gateway::Identity;
use parley_gateway::dispatcher::Exclude;
use parley_types::api::{EditMessageRequest, MessageView, SendMessageRequest, UpdateStatusRequest};
use parley_types::events::ServerEvent;
use parley_types::models::{ChatId, Message, MessageId, Room, UserId};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::state::{AppState, AppStateInner};

const MAX_PAGE: u32 = 200;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: `createdAt` of the oldest message on the previous page.
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> u32 {
    50
}

/// Decode a base64 ciphertext. Empty payloads are rejected.
pub(crate) fn decode_payload(payload: &str) -> ApiResult<Vec<u8>> {
    let bytes = B64
        .decode(payload)
        .map_err(|e| ApiError::Validation(format!("payload is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(ApiError::Validation("payload is empty".into()));
    }
    Ok(bytes)
}

/// Announce a committed message to its chat room.
pub(crate) async fn publish_created(state: &AppStateInner, message: &Message) {
    let room = Room::Chat(message.chat_id);
    let event = ServerEvent::MessageCreated {
        message: MessageView::from(message),
    };
    state.dispatcher.publish(&room, event, Exclude::Nobody).await;
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<MessageQuery>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;

    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before;
    let rows = state
        .db(move |db| db.get_messages(chat_id, limit, before))
        .await?;

    let views: Vec<MessageView> = rows.iter().map(MessageView::from).collect();
    Ok(Json(views))
}

#[derive(Debug, Deserialize)]
pub struct MentionQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// Messages that mentioned the caller, newest first.
pub async fn list_mentions(
    State(state): State<AppState>,
    Query(query): Query<MentionQuery>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let limit = query.limit.clamp(1, MAX_PAGE);
    let rows = state
        .db(move |db| db.mentions_for_user(user_id, limit))
        .await?;

    let views: Vec<MessageView> = rows.iter().map(MessageView::from).collect();
    Ok(Json(views))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;
    let payload = decode_payload(&req.payload)?;

    if let Some(parent_id) = req.parent_id {
        let parent = state.db(move |db| db.get_message(parent_id)).await?;
        if parent.map(|p| p.chat_id) != Some(chat_id) {
            return Err(ApiError::Validation(format!(
                "parent message {} is not in chat {}",
                parent_id, chat_id
            )));
        }
    }

    let sender_id = identity.user_id;
    let kind = req.kind;
    let parent_id = req.parent_id;
    let mut mentions = req.mentions;
    mentions.sort();
    mentions.dedup();
    mentions.retain(|id| *id != sender_id);

    let (message, mentioned) = state
        .db(move |db| {
            let message = db.insert_message(&NewMessage {
                chat_id,
                sender_id,
                payload: &payload,
                kind,
                parent_id,
                created_at: Utc::now(),
            })?;
            let mut mentioned: Vec<UserId> = Vec::with_capacity(mentions.len());
            for user_id in mentions {
                if db.is_member(chat_id, user_id)? {
                    mentioned.push(user_id);
                }
            }
            db.record_mentions(message.id, &mentioned)?;
            Ok((message, mentioned))
        })
        .await?;

    debug!("{} ({}) sent message {} to chat {}", identity.username, sender_id, message.id, chat_id);
    publish_created(&state, &message).await;

    for user_id in mentioned {
        let event = ServerEvent::Mention {
            chat_id,
            message_id: message.id,
            mentioned_by: sender_id,
        };
        state
            .dispatcher
            .publish(&Room::User(user_id), event, Exclude::Nobody)
            .await;
    }

    Ok((StatusCode::CREATED, Json(MessageView::from(&message))))
}

pub async fn get_thread(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state.member_message(message_id, identity.user_id).await?;

    let replies = state.db(move |db| db.thread_replies(message_id)).await?;
    let views: Vec<MessageView> = replies.iter().map(MessageView::from).collect();
    Ok(Json(views))
}

/// Move a message forward through sent → delivered → seen. Requests that would
/// move it backwards are accepted and ignored.
pub async fn update_status(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<UpdateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.member_message(message_id, identity.user_id).await?;

    let requested = req.status;
    let changed = state
        .db(move |db| db.advance_status(message_id, requested))
        .await?;
    let status = message.status.max(requested);

    if changed {
        let event = ServerEvent::MessageStatusChanged {
            chat_id: message.chat_id,
            message_id,
            status,
        };
        state
            .dispatcher
            .publish(&Room::Chat(message.chat_id), event, Exclude::Nobody)
            .await;
    }

    Ok(Json(json!({ "status": status, "changed": changed })))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut message = state.member_message(message_id, identity.user_id).await?;
    if message.sender_id != identity.user_id {
        return Err(ApiError::Authorization("only the sender may edit a message".into()));
    }
    if message.deleted {
        return Err(ApiError::Validation("message has been deleted".into()));
    }

    let payload = decode_payload(&req.payload)?;
    let now = Utc::now();
    let stored = payload.clone();
    let updated = state
        .db(move |db| db.edit_message(message_id, &stored, now))
        .await?;
    if !updated {
        // deleted between the lookup and the update
        return Err(ApiError::Validation("message has been deleted".into()));
    }

    message.payload = payload;
    message.edited_at = Some(now);

    let event = ServerEvent::MessageEdited {
        chat_id: message.chat_id,
        message_id,
        payload: req.payload,
        edited_at: now,
    };
    state
        .dispatcher
        .publish(&Room::Chat(message.chat_id), event, Exclude::Nobody)
        .await;

    Ok(Json(MessageView::from(&message)))
}

/// Soft delete. The row stays so history and sync keep their shape.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let message = state.member_message(message_id, identity.user_id).await?;
    if message.sender_id != identity.user_id {
        return Err(ApiError::Authorization("only the sender may delete a message".into()));
    }

    let deleted = state.db(move |db| db.soft_delete_message(message_id)).await?;
    if deleted {
        info!("{} ({}) deleted message {}", identity.username, identity.user_id, message_id);
        let event = ServerEvent::MessageDeleted {
            chat_id: message.chat_id,
            message_id,
        };
        state
            .dispatcher
            .publish(&Room::Chat(message.chat_id), event, Exclude::Nobody)
            .await;
    }

    Ok(StatusCode::NO_CONTENT)
}
