use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use parley_gateway::Identity;
use parley_gateway::dispatcher::Exclude;
use parley_types::api::{AddMemberRequest, CreateChatRequest, CreateChatResponse};
use parley_types::events::ServerEvent;
use parley_types::models::{Chat, ChatId, ChatKind, Room, UserId};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::state::AppState;

/// Create a chat with the caller as first member. A personal chat with a user
/// the caller already has one with returns the existing chat.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let creator = identity.user_id;
    let mut members: Vec<UserId> = req.members.into_iter().filter(|id| *id != creator).collect();
    members.sort();
    members.dedup();

    let kind = req.kind.unwrap_or(if members.len() == 1 {
        ChatKind::Personal
    } else {
        ChatKind::Group
    });
    if kind == ChatKind::Personal && members.len() != 1 {
        return Err(ApiError::Validation(
            "a personal chat has exactly one other member".into(),
        ));
    }
    let name = req.name.filter(|n| !n.trim().is_empty());

    let (chat_id, created) = state
        .db(move |db| {
            if kind == ChatKind::Personal {
                if let Some(existing) = db.find_personal_chat(creator, members[0])? {
                    return Ok((existing, false));
                }
            }
            let chat = db.create_chat(kind, name.as_deref(), creator, &members, Utc::now())?;
            Ok((chat.id, true))
        })
        .await?;

    if created {
        info!("{} ({}) created {} chat {}", identity.username, creator, kind.as_str(), chat_id);
    }
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(CreateChatResponse { chat_id, created })))
}

pub async fn list_chats(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Json<Vec<Chat>>> {
    let user_id = identity.user_id;
    let chats = state.db(move |db| db.chats_for_user(user_id)).await?;
    Ok(Json(chats))
}

/// Membership of group and project chats is managed by its members; personal
/// chats are fixed at creation.
async fn managed_chat(state: &AppState, chat_id: ChatId, caller: UserId) -> ApiResult<Chat> {
    let chat = state.member_chat(chat_id, caller).await?;
    if !chat.kind.has_managed_membership() {
        return Err(ApiError::Validation("not a group or project chat".into()));
    }
    Ok(chat)
}

pub async fn add_member(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> ApiResult<impl IntoResponse> {
    managed_chat(&state, chat_id, identity.user_id).await?;

    let user_id = req.user_id;
    let added = state
        .db(move |db| db.add_member(chat_id, user_id, Utc::now()))
        .await?;
    if added {
        info!("{} added {} to chat {}", identity.user_id, user_id, chat_id);
    }

    Ok(Json(json!({ "added": added })))
}

/// Remove a member. Their live sessions stop receiving the chat's fanout at once.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((chat_id, user_id)): Path<(ChatId, UserId)>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    managed_chat(&state, chat_id, identity.user_id).await?;

    let removed = state
        .db(move |db| db.remove_member(chat_id, user_id))
        .await?;
    if removed {
        info!("{} removed {} from chat {}", identity.user_id, user_id, chat_id);
        state.dispatcher.leave_user(user_id, &Room::Chat(chat_id)).await;
    }

    Ok(Json(json!({ "removed": removed })))
}

pub async fn touch_last_seen(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let now = Utc::now();
    let updated = state
        .db(move |db| db.touch_last_seen(chat_id, user_id, now))
        .await?;
    if !updated {
        return Err(ApiError::not_member());
    }

    let event = ServerEvent::LastSeen {
        chat_id,
        user_id,
        last_seen: now,
    };
    state
        .dispatcher
        .publish(&Room::Chat(chat_id), event, Exclude::Nobody)
        .await;

    Ok(Json(json!({ "lastSeen": now })))
}

pub async fn get_last_seen(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;
    let members = state.db(move |db| db.chat_members(chat_id)).await?;
    Ok(Json(members))
}
