//! Offline sync: batch upload of messages written while disconnected, and a
//! timestamp delta for catching up.
//!
//! The delta only carries messages created after the cursor. Edits, deletions,
//! reactions and receipts made in the meantime are not replayed; clients
//! refetch those through the regular endpoints.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info};

use parley_db::NewMessage;
use parley_gateway::Identity;
use parley_types::api::{BatchIngestRequest, BatchIngestResponse, MessageView};
use parley_types::models::{ChatId, MessageId, MessageKind};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::messages::{decode_payload, publish_created};
use crate::state::AppState;

pub const MAX_BATCH: usize = 500;

struct PreparedEntry {
    payload: Vec<u8>,
    kind: MessageKind,
    parent_id: Option<MessageId>,
    created_at: DateTime<Utc>,
}

/// Persist a batch of messages authored offline.
///
/// Every entry is validated before anything is written. Entries are then
/// committed one by one; if storage fails part way, the committed prefix is
/// still published and the request reports the failure.
pub async fn batch_ingest(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Extension(identity): Extension<Identity>,
    ApiJson(req): ApiJson<BatchIngestRequest>,
) -> ApiResult<impl IntoResponse> {
    state.member_chat(chat_id, identity.user_id).await?;

    if req.messages.len() > MAX_BATCH {
        return Err(ApiError::Validation(format!(
            "batch of {} exceeds the limit of {}",
            req.messages.len(),
            MAX_BATCH
        )));
    }

    let received_at = Utc::now();
    let entries = req
        .messages
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let payload = decode_payload(&entry.payload)
                .map_err(|e| ApiError::Validation(format!("entry {}: {}", i, e)))?;
            Ok(PreparedEntry {
                payload,
                kind: entry.kind,
                parent_id: entry.parent_id,
                created_at: entry.created_at.unwrap_or(received_at),
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let sender_id = identity.user_id;
    let (committed, failure) = state
        .db(move |db| {
            // parents must already live in this chat
            for (i, entry) in entries.iter().enumerate() {
                if let Some(parent_id) = entry.parent_id {
                    let parent = db.get_message(parent_id)?;
                    if parent.map(|p| p.chat_id) != Some(chat_id) {
                        return Ok(Err(ApiError::Validation(format!(
                            "entry {}: parent message {} is not in chat {}",
                            i, parent_id, chat_id
                        ))));
                    }
                }
            }

            let mut committed = Vec::with_capacity(entries.len());
            let mut failure = None;
            for entry in &entries {
                let inserted = db.insert_message(&NewMessage {
                    chat_id,
                    sender_id,
                    payload: &entry.payload,
                    kind: entry.kind,
                    parent_id: entry.parent_id,
                    created_at: entry.created_at,
                });
                match inserted {
                    Ok(message) => committed.push(message),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            Ok(Ok((committed, failure)))
        })
        .await??;

    for message in &committed {
        publish_created(&state, message).await;
    }

    if let Some(e) = failure {
        error!(
            "Batch ingest into chat {} stopped after {} entries: {}",
            chat_id,
            committed.len(),
            e
        );
        return Err(ApiError::Storage(e));
    }

    info!(
        "{} ({}) synced {} offline message(s) into chat {}",
        identity.username,
        sender_id,
        committed.len(),
        chat_id
    );
    let message_ids = committed.iter().map(|m| m.id).collect();
    Ok((StatusCode::CREATED, Json(BatchIngestResponse { message_ids })))
}

/// Parse the `since` cursor. An unencoded `+hh:mm` offset reaches us as
/// ` hh:mm` after query decoding and is read back as `+`.
fn parse_since(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let parsed = DateTime::parse_from_rfc3339(raw).or_else(|e| match raw.rsplit_once(' ') {
        Some((stamp, offset)) if offset.len() == 5 && offset.as_bytes()[2] == b':' => {
            DateTime::parse_from_rfc3339(&format!("{}+{}", stamp, offset)).map_err(|_| e)
        }
        _ => Err(e),
    })?;
    Ok(parsed.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    pub since: String,
}

/// Every message in the chat created strictly after `since`, oldest first.
pub async fn sync_since(
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<SinceQuery>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<impl IntoResponse> {
    let since = parse_since(&query.since)
        .map_err(|e| ApiError::Validation(format!("since must be an RFC 3339 timestamp: {}", e)))?;

    state.member_chat(chat_id, identity.user_id).await?;

    let messages = state.db(move |db| db.messages_since(chat_id, since)).await?;
    let views: Vec<MessageView> = messages.iter().map(MessageView::from).collect();
    Ok(Json(views))
}
