use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use parley_gateway::Identity;
use parley_types::api::SetPublicKeyRequest;
use parley_types::models::UserId;

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::state::AppState;

const MAX_KEY_BYTES: usize = 8 * 1024;

/// Publish the caller's public key, replacing any previous one.
pub async fn set_public_key(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<SetPublicKeyRequest>,
) -> ApiResult<impl IntoResponse> {
    let key = req.public_key;
    if key.trim().is_empty() {
        return Err(ApiError::Validation("public key is empty".into()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(ApiError::Validation(format!(
            "public key exceeds {} bytes",
            MAX_KEY_BYTES
        )));
    }

    let user_id = identity.user_id;
    let record = state
        .db(move |db| db.set_public_key(user_id, &key, Utc::now()))
        .await?;
    info!("{} ({}) published a public key", identity.username, user_id);

    Ok(Json(record))
}

pub async fn get_public_key(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Extension(_identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .db(move |db| db.get_public_key(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no public key for {}", user_id)))?;
    Ok(Json(record))
}
