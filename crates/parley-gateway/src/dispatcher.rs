use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;
use parley_types::models::{Room, SessionId, UserId};

use crate::auth::Identity;
use crate::registry::{Registry, SessionEntry};

/// Per-session outbound queue depth. A slow client that falls this far behind
/// loses events rather than stalling the publisher.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Which members a publish skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclude {
    Nobody,
    Session(SessionId),
    /// Every session of this user (typing indicators)
    User(UserId),
}

impl Exclude {
    fn skips(&self, id: SessionId, entry: &SessionEntry) -> bool {
        match self {
            Exclude::Nobody => false,
            Exclude::Session(excluded) => *excluded == id,
            Exclude::User(user_id) => entry.identity.user_id == *user_id,
        }
    }
}

/// Outcome of handing an event to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full, or the target is not where the event was addressed
    Dropped,
    /// Session closed or unknown
    Gone,
}

/// A registered session: its id, who it belongs to, and its outbound queue.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub identity: Identity,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// A session removed from the registry, with the rooms it was in.
#[derive(Debug)]
pub struct Departure {
    pub identity: Identity,
    pub rooms: Vec<Room>,
}

/// Manages all live sessions and fans events out to rooms.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: RwLock<Registry>,
    queue_depth: usize,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_queue_depth(DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: RwLock::new(Registry::default()),
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    /// Register a session for a verified identity. The session starts in its
    /// own `user:<id>` room.
    pub async fn register(&self, identity: Identity) -> Session {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        self.inner.registry.write().await.insert(id, identity.clone(), tx);
        info!("Session {} registered for {} ({})", id, identity.username, identity.user_id);
        Session {
            id,
            identity,
            events: rx,
        }
    }

    /// Returns true if the session newly joined.
    pub async fn join(&self, session_id: SessionId, room: Room) -> bool {
        let joined = self.inner.registry.write().await.join(session_id, room.clone());
        if joined {
            debug!("Session {} joined {}", session_id, room);
        }
        joined
    }

    /// Returns true if the session was in the room.
    pub async fn leave(&self, session_id: SessionId, room: &Room) -> bool {
        let left = self.inner.registry.write().await.leave(session_id, room);
        if left {
            debug!("Session {} left {}", session_id, room);
        }
        left
    }

    /// Take every session of a user out of a room, e.g. after they lose chat
    /// membership.
    pub async fn leave_user(&self, user_id: UserId, room: &Room) -> usize {
        let left = self.inner.registry.write().await.leave_user(user_id, room);
        if left > 0 {
            debug!("{} session(s) of {} removed from {}", left, user_id, room);
        }
        left
    }

    /// Remove a session and all its memberships. `None` if it was already gone,
    /// so only one caller ever observes a given departure.
    pub async fn disconnect(&self, session_id: SessionId) -> Option<Departure> {
        let entry = self.inner.registry.write().await.remove(session_id)?;
        info!(
            "Session {} for {} ({}) disconnected",
            session_id, entry.identity.username, entry.identity.user_id
        );
        let rooms = entry.rooms().cloned().collect();
        Some(Departure {
            identity: entry.identity,
            rooms,
        })
    }

    pub async fn identity(&self, session_id: SessionId) -> Option<Identity> {
        let registry = self.inner.registry.read().await;
        registry.session(session_id).map(|entry| entry.identity.clone())
    }

    pub async fn is_joined(&self, session_id: SessionId, room: &Room) -> bool {
        self.inner.registry.read().await.is_joined(session_id, room)
    }

    pub async fn members(&self, room: &Room) -> Vec<SessionId> {
        let registry = self.inner.registry.read().await;
        registry.members(room).map(|(id, _)| id).collect()
    }

    pub async fn session_count(&self) -> usize {
        self.inner.registry.read().await.session_count()
    }

    /// Deliver an event to every current member of a room, minus `exclude`.
    /// Returns the number of sessions that accepted it.
    ///
    /// Never blocks on a slow member: a full queue drops the event for that
    /// member only. Members whose queue is closed are reaped in the background.
    pub async fn publish(&self, room: &Room, event: ServerEvent, exclude: Exclude) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();
        {
            let registry = self.inner.registry.read().await;
            for (id, entry) in registry.members(room) {
                if exclude.skips(id, entry) {
                    continue;
                }
                match deliver(id, entry, event.clone()) {
                    Delivery::Sent => delivered += 1,
                    Delivery::Dropped => {}
                    Delivery::Gone => stale.push(id),
                }
            }
        }
        debug!("Published {} to {} ({} delivered)", event.name(), room, delivered);
        self.reap(stale);
        delivered
    }

    /// Deliver to one session regardless of room.
    pub async fn send_to_session(&self, session_id: SessionId, event: ServerEvent) -> Delivery {
        let outcome = {
            let registry = self.inner.registry.read().await;
            match registry.session(session_id) {
                Some(entry) => deliver(session_id, entry, event),
                None => Delivery::Gone,
            }
        };
        if outcome == Delivery::Gone {
            self.reap(vec![session_id]);
        }
        outcome
    }

    /// Deliver to one session only if it is currently a member of `room`.
    /// Membership check and enqueue happen under the same read lock.
    pub async fn send_to_member(&self, room: &Room, session_id: SessionId, event: ServerEvent) -> Delivery {
        let outcome = {
            let registry = self.inner.registry.read().await;
            match registry.session(session_id) {
                Some(entry) if registry.is_joined(session_id, room) => deliver(session_id, entry, event),
                Some(_) => {
                    warn!("Dropping {} for session {}: not in {}", event.name(), session_id, room);
                    Delivery::Dropped
                }
                None => {
                    warn!("Dropping {} for unknown session {}", event.name(), session_id);
                    return Delivery::Gone;
                }
            }
        };
        if outcome == Delivery::Gone {
            self.reap(vec![session_id]);
        }
        outcome
    }

    /// Clean up sessions whose receiving side has gone away.
    fn reap(&self, stale: Vec<SessionId>) {
        for session_id in stale {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                crate::signaling::drop_session(&dispatcher, session_id).await;
            });
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(id: SessionId, entry: &SessionEntry, event: ServerEvent) -> Delivery {
    match entry.tx.try_send(event) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(event)) => {
            warn!("Session {} queue full, dropping {}", id, event.name());
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Session {} queue closed", id);
            Delivery::Gone
        }
    }
}
