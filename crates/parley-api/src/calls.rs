use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{debug, info};

use parley_gateway::Identity;
use parley_types::api::StartCallRequest;
use parley_types::models::{CallId, ChatId};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::state::AppState;

/// Record the start of a voice, video or screen-share call in a chat.
pub async fn start_call(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<StartCallRequest>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;

    let started_by = identity.user_id;
    let kind = req.kind;
    let participants = req.participants;
    let call = state
        .db(move |db| db.start_call(chat_id, started_by, kind, &participants, Utc::now()))
        .await?;

    info!(
        "{} ({}) started {} call {} in chat {}",
        identity.username,
        started_by,
        call.kind.as_str(),
        call.id,
        chat_id
    );
    Ok((StatusCode::CREATED, Json(call)))
}

/// Mark a call as ended. Ending twice keeps the first end time.
pub async fn end_call(
    State(state): State<AppState>,
    Path(call_id): Path<CallId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let not_found = || ApiError::NotFound(format!("call {} not found", call_id));

    let call = state
        .db(move |db| db.get_call(call_id))
        .await?
        .ok_or_else(not_found)?;
    state.member_chat(call.chat_id, identity.user_id).await?;

    let (ended, call) = state
        .db(move |db| {
            let ended = db.end_call(call_id, Utc::now())?;
            Ok((ended, db.get_call(call_id)?))
        })
        .await?;
    let call = call.ok_or_else(not_found)?;

    if ended {
        info!("{} ({}) ended call {}", identity.username, identity.user_id, call_id);
    } else {
        debug!("Call {} was already ended", call_id);
    }
    Ok(Json(call))
}

pub async fn chat_calls(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;
    let calls = state.db(move |db| db.calls_for_chat(chat_id)).await?;
    Ok(Json(calls))
}

/// The caller's own call history across every chat.
pub async fn my_calls(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let user_id = identity.user_id;
    let calls = state.db(move |db| db.calls_for_user(user_id)).await?;
    Ok(Json(calls))
}
