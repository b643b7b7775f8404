//! Session and room bookkeeping. Plain data; the `Dispatcher` owns the lock.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use parley_types::events::ServerEvent;
use parley_types::models::{Room, SessionId, UserId};

use crate::auth::Identity;

/// One live transport session.
#[derive(Debug)]
pub struct SessionEntry {
    pub identity: Identity,
    pub(crate) tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<Room>,
}

impl SessionEntry {
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.iter()
    }
}

/// Session → rooms and room → sessions, kept in step.
///
/// A room exists only while at least one session is joined to it.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<SessionId, SessionEntry>,
    rooms: HashMap<Room, HashSet<SessionId>>,
}

impl Registry {
    /// Register a session and put it in its own user channel.
    pub fn insert(&mut self, id: SessionId, identity: Identity, tx: mpsc::Sender<ServerEvent>) {
        let user_room = Room::User(identity.user_id);
        self.sessions.insert(
            id,
            SessionEntry {
                identity,
                tx,
                rooms: HashSet::new(),
            },
        );
        self.join(id, user_room);
    }

    /// Returns true if the session was not already in the room.
    pub fn join(&mut self, id: SessionId, room: Room) -> bool {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return false;
        };
        if !entry.rooms.insert(room.clone()) {
            return false;
        }
        self.rooms.entry(room).or_default().insert(id);
        true
    }

    /// Returns true if the session was in the room.
    pub fn leave(&mut self, id: SessionId, room: &Room) -> bool {
        let removed = self
            .sessions
            .get_mut(&id)
            .is_some_and(|entry| entry.rooms.remove(room));
        if removed {
            self.detach(id, room);
        }
        removed
    }

    /// Take every session of a user out of a room. Returns how many left.
    pub fn leave_user(&mut self, user_id: UserId, room: &Room) -> usize {
        self.sessions_of(user_id)
            .into_iter()
            .filter(|id| self.leave(*id, room))
            .count()
    }

    /// Drop a session and every membership it held.
    pub fn remove(&mut self, id: SessionId) -> Option<SessionEntry> {
        let entry = self.sessions.remove(&id)?;
        for room in &entry.rooms {
            self.detach(id, room);
        }
        Some(entry)
    }

    fn detach(&mut self, id: SessionId, room: &Room) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    pub fn session(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.get(&id)
    }

    pub fn is_joined(&self, id: SessionId, room: &Room) -> bool {
        self.rooms.get(room).is_some_and(|members| members.contains(&id))
    }

    /// Current members of a room with their session entries.
    pub fn members<'a>(&'a self, room: &Room) -> impl Iterator<Item = (SessionId, &'a SessionEntry)> + 'a {
        self.rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id).map(|entry| (*id, entry)))
    }

    pub fn sessions_of(&self, user_id: UserId) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|(_, entry)| entry.identity.user_id == user_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "grace".into(),
        }
    }

    fn registered(registry: &mut Registry) -> SessionId {
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert(id, identity(), tx);
        id
    }

    #[test]
    fn new_session_joins_own_user_channel() {
        let mut registry = Registry::default();
        let id = registered(&mut registry);
        let user = registry.session(id).unwrap().identity.user_id;

        assert!(registry.is_joined(id, &Room::User(user)));
        assert_eq!(registry.sessions_of(user), vec![id]);
    }

    #[test]
    fn join_and_leave_are_idempotent() {
        let mut registry = Registry::default();
        let id = registered(&mut registry);
        let room = Room::Chat(42);

        assert!(registry.join(id, room.clone()));
        assert!(!registry.join(id, room.clone()));
        assert_eq!(registry.members(&room).count(), 1);

        assert!(registry.leave(id, &room));
        assert!(!registry.leave(id, &room));
        assert!(!registry.is_joined(id, &room));
    }

    #[test]
    fn empty_rooms_disappear() {
        let mut registry = Registry::default();
        let a = registered(&mut registry);
        let b = registered(&mut registry);
        let room = Room::Call("9".into());

        registry.join(a, room.clone());
        registry.join(b, room.clone());
        // two user channels + the call room
        assert_eq!(registry.room_count(), 3);

        registry.leave(a, &room);
        assert_eq!(registry.room_count(), 3);
        registry.leave(b, &room);
        assert_eq!(registry.room_count(), 2);
    }

    #[test]
    fn remove_revokes_every_membership() {
        let mut registry = Registry::default();
        let id = registered(&mut registry);
        registry.join(id, Room::Chat(1));
        registry.join(id, Room::Video("v".into()));

        let entry = registry.remove(id).unwrap();
        assert_eq!(entry.rooms().count(), 3);
        assert_eq!(registry.room_count(), 0);
        assert_eq!(registry.session_count(), 0);
        assert!(registry.remove(id).is_none());
    }

    #[test]
    fn leave_user_covers_all_devices() {
        let mut registry = Registry::default();
        let id = registered(&mut registry);
        let user = registry.session(id).unwrap().identity.user_id;
        let other_device = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);
        registry.insert(other_device, Identity { user_id: user, username: "grace".into() }, tx);
        let room = Room::Chat(8);
        registry.join(id, room.clone());
        registry.join(other_device, room.clone());

        assert_eq!(registry.leave_user(user, &room), 2);
        assert_eq!(registry.members(&room).count(), 0);
        assert!(registry.is_joined(id, &Room::User(user)));
    }

    #[test]
    fn unknown_session_cannot_join() {
        let mut registry = Registry::default();
        assert!(!registry.join(Uuid::new_v4(), Room::Chat(1)));
        assert_eq!(registry.room_count(), 0);
    }
}
