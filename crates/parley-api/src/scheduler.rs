use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use parley_db::Promotion;

use crate::error::ApiResult;
use crate::messages::publish_created;
use crate::state::{AppState, AppStateInner};

/// Background task that promotes due scheduled messages.
///
/// Runs for the life of the process. A sweep that hits a storage error is
/// abandoned and the untouched rows are picked up by the next one.
pub async fn run_delivery_loop(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Scheduled delivery sweeping every {:?}", period);

    loop {
        interval.tick().await;

        match deliver_due(&state).await {
            Ok(count) => {
                if count > 0 {
                    info!("Scheduled delivery: promoted {} message(s)", count);
                }
            }
            Err(e) => {
                warn!("Scheduled delivery sweep failed: {}", e);
            }
        }
    }
}

/// One sweep: claim and promote every due row, publishing each message only
/// after its promotion committed. Returns how many this sweep promoted.
pub async fn deliver_due(state: &AppStateInner) -> ApiResult<usize> {
    let now = Utc::now();
    let due = state.db(move |db| db.due_scheduled(now)).await?;

    let mut promoted = 0;
    for scheduled in due {
        let id = scheduled.id;
        match state.db(move |db| db.promote_scheduled(id, Utc::now())).await {
            Ok(Promotion::Delivered(message)) => {
                debug!("Scheduled message {} promoted to message {}", id, message.id);
                publish_created(state, &message).await;
                promoted += 1;
            }
            Ok(Promotion::AlreadyClaimed) => debug!("Scheduled message {} already claimed", id),
            Ok(Promotion::SenderGone) => debug!("Scheduled message {} dropped, sender left the chat", id),
            Err(e) => warn!("Promoting scheduled message {} failed, retrying next sweep: {}", id, e),
        }
    }

    Ok(promoted)
}
