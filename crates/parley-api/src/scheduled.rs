use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use parley_gateway::Identity;
use parley_types::api::{ScheduleMessageRequest, ScheduledMessageView};
use parley_types::models::{ChatId, ScheduledId};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::messages::decode_payload;
use crate::state::AppState;

/// Queue a message for later delivery. A time already in the past is
/// delivered on the next sweep.
pub async fn schedule_message(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<ScheduleMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;
    let payload = decode_payload(&req.payload)?;

    let sender_id = identity.user_id;
    let kind = req.kind;
    let scheduled_for = req.scheduled_for;
    let scheduled = state
        .db(move |db| db.schedule_message(chat_id, sender_id, &payload, kind, scheduled_for, Utc::now()))
        .await?;

    info!(
        "{} ({}) scheduled message {} for {}",
        identity.username, sender_id, scheduled.id, scheduled.scheduled_for
    );
    Ok((StatusCode::CREATED, Json(ScheduledMessageView::from(&scheduled))))
}

/// The caller's own pending scheduled messages.
pub async fn list_scheduled(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let sender_id = identity.user_id;
    let pending = state
        .db(move |db| db.pending_scheduled_for_sender(sender_id))
        .await?;
    let views: Vec<ScheduledMessageView> = pending.iter().map(ScheduledMessageView::from).collect();
    Ok(Json(views))
}

pub async fn cancel_scheduled(
    State(state): State<AppState>,
    Path(id): Path<ScheduledId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let sender_id = identity.user_id;
    let (cancelled, existing) = state
        .db(move |db| {
            let cancelled = db.cancel_scheduled(id, sender_id)?;
            let existing = if cancelled { None } else { db.get_scheduled(id)? };
            Ok((cancelled, existing))
        })
        .await?;

    if cancelled {
        return Ok(StatusCode::NO_CONTENT);
    }
    match existing {
        Some(row) if row.sender_id == sender_id && row.delivered => Err(ApiError::Validation(format!(
            "scheduled message {} was already delivered",
            id
        ))),
        // other senders' rows are indistinguishable from missing ones
        _ => Err(ApiError::NotFound(format!("scheduled message {} not found", id))),
    }
}
