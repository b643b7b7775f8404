//! Call and video rooms: presence notices and peer-to-peer signal relay.
//!
//! Signal payloads (SDP, ICE, screen-share hints) are opaque; the relay only
//! checks that both ends share the room and stamps the sender's identity.

use tracing::{debug, info};

use parley_types::events::ServerEvent;
use parley_types::models::{Room, SessionId, UserId};

use crate::dispatcher::{Delivery, Dispatcher, Exclude};
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    Video,
}

impl CallKind {
    pub fn room(&self, room_id: &str) -> Room {
        match self {
            CallKind::Call => Room::Call(room_id.to_string()),
            CallKind::Video => Room::Video(room_id.to_string()),
        }
    }

    fn of(room: &Room) -> Option<(CallKind, &str)> {
        match room {
            Room::Call(id) => Some((CallKind::Call, id.as_str())),
            Room::Video(id) => Some((CallKind::Video, id.as_str())),
            _ => None,
        }
    }

    fn joined(&self, room_id: &str, user_id: UserId, session_id: SessionId) -> ServerEvent {
        let room_id = room_id.to_string();
        match self {
            CallKind::Call => ServerEvent::CallUserJoined { room_id, user_id, session_id },
            CallKind::Video => ServerEvent::VideoUserJoined { room_id, user_id, session_id },
        }
    }

    fn left(&self, room_id: &str, user_id: UserId, session_id: SessionId) -> ServerEvent {
        let room_id = room_id.to_string();
        match self {
            CallKind::Call => ServerEvent::CallUserLeft { room_id, user_id, session_id },
            CallKind::Video => ServerEvent::VideoUserLeft { room_id, user_id, session_id },
        }
    }
}

/// Where a relayed signal went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relay {
    Targeted(Delivery),
    Broadcast(usize),
}

/// Join a call/video room and tell the existing members. Rejoining is a no-op.
pub async fn join_call(
    dispatcher: &Dispatcher,
    session_id: SessionId,
    kind: CallKind,
    room_id: &str,
) -> Result<bool, GatewayError> {
    let identity = dispatcher
        .identity(session_id)
        .await
        .ok_or(GatewayError::UnknownSession(session_id))?;

    let room = kind.room(room_id);
    if !dispatcher.join(session_id, room.clone()).await {
        return Ok(false);
    }

    info!("{} ({}) joined {}", identity.username, identity.user_id, room);
    let notice = kind.joined(room_id, identity.user_id, session_id);
    dispatcher.publish(&room, notice, Exclude::Session(session_id)).await;
    Ok(true)
}

/// Leave a call/video room and tell the remaining members.
pub async fn leave_call(
    dispatcher: &Dispatcher,
    session_id: SessionId,
    kind: CallKind,
    room_id: &str,
) -> Result<bool, GatewayError> {
    let identity = dispatcher
        .identity(session_id)
        .await
        .ok_or(GatewayError::UnknownSession(session_id))?;

    let room = kind.room(room_id);
    if !dispatcher.leave(session_id, &room).await {
        return Ok(false);
    }

    info!("{} ({}) left {}", identity.username, identity.user_id, room);
    let notice = kind.left(room_id, identity.user_id, session_id);
    dispatcher.publish(&room, notice, Exclude::Nobody).await;
    Ok(true)
}

/// Forward a signal from `from` within `room`.
///
/// The sender must be in the room. With a target, only that session receives
/// it, and only if it is also in the room. Without one, every other member
/// does.
pub async fn relay_to_target(
    dispatcher: &Dispatcher,
    from: SessionId,
    room: &Room,
    target: Option<SessionId>,
    event: ServerEvent,
) -> Result<Relay, GatewayError> {
    if !dispatcher.is_joined(from, room).await {
        return Err(GatewayError::NotInRoom(room.to_string()));
    }

    let relay = match target {
        Some(to) => Relay::Targeted(dispatcher.send_to_member(room, to, event).await),
        None => Relay::Broadcast(dispatcher.publish(room, event, Exclude::Session(from)).await),
    };
    debug!("Relayed signal in {} from {}: {:?}", room, from, relay);
    Ok(relay)
}

/// Tear a session down and announce its departure from every call/video room
/// it was still in. Safe to call more than once.
pub async fn drop_session(dispatcher: &Dispatcher, session_id: SessionId) {
    let Some(departure) = dispatcher.disconnect(session_id).await else {
        return;
    };

    for room in &departure.rooms {
        if let Some((kind, room_id)) = CallKind::of(room) {
            let notice = kind.left(room_id, departure.identity.user_id, session_id);
            dispatcher.publish(room, notice, Exclude::Nobody).await;
        }
    }
}
