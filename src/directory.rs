use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::types::{ConnectionId, RoomId};

/// Room id → member connection ids.
///
/// Rooms come into existence on first join and are dropped again when the
/// last member leaves, so a room id never has two live entries. All
/// mutation goes through `join`/`leave`; readers get an owned snapshot so
/// fanout never iterates a set another task is mutating.
#[derive(Default)]
pub struct RoomDirectory {
    rooms: Mutex<HashMap<RoomId, HashSet<ConnectionId>>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room: &RoomId, connection: ConnectionId) {
        self.rooms
            .lock()
            .expect("room directory poisoned")
            .entry(room.clone())
            .or_default()
            .insert(connection);
    }

    /// Idempotent; removes the room entry entirely when its member set
    /// empties. Returns whether this call removed the room, so callers can
    /// release any per-room state of their own.
    pub fn leave(&self, room: &RoomId, connection: ConnectionId) -> bool {
        let mut rooms = self.rooms.lock().expect("room directory poisoned");
        if let Some(members) = rooms.get_mut(room) {
            members.remove(&connection);
            if members.is_empty() {
                rooms.remove(room);
                return true;
            }
        }
        false
    }

    /// An owned copy of the member set at call time. Unknown rooms yield an
    /// empty snapshot rather than an error: a room can legitimately have
    /// zero members for a moment.
    pub fn members_snapshot(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .lock()
            .expect("room directory poisoned")
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().expect("room directory poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_creates_room_lazily() {
        let directory = RoomDirectory::new();
        let room = RoomId::new("chat:42");
        let a = ConnectionId::new();

        assert_eq!(directory.room_count(), 0);
        directory.join(&room, a);
        assert_eq!(directory.room_count(), 1);
        assert_eq!(directory.members_snapshot(&room), vec![a]);
    }

    #[test]
    fn room_is_removed_when_last_member_leaves() {
        let directory = RoomDirectory::new();
        let room = RoomId::new("shout:main");
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        directory.join(&room, a);
        directory.join(&room, b);
        assert!(!directory.leave(&room, a));
        assert_eq!(directory.room_count(), 1);

        assert!(directory.leave(&room, b));
        assert_eq!(directory.room_count(), 0);
        assert!(directory.members_snapshot(&room).is_empty());
    }

    #[test]
    fn leave_is_idempotent() {
        let directory = RoomDirectory::new();
        let room = RoomId::new("chat:42");
        let a = ConnectionId::new();

        directory.join(&room, a);
        assert!(directory.leave(&room, a));
        assert!(!directory.leave(&room, a));
        assert!(!directory.leave(&RoomId::new("never-existed"), a));
        assert_eq!(directory.room_count(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let directory = RoomDirectory::new();
        let room = RoomId::new("chat:42");
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        directory.join(&room, a);
        let snapshot = directory.members_snapshot(&room);

        directory.join(&room, b);
        assert_eq!(snapshot, vec![a]);
        assert_eq!(directory.members_snapshot(&room).len(), 2);
    }

    #[test]
    fn unknown_room_yields_empty_snapshot() {
        let directory = RoomDirectory::new();
        assert!(directory
            .members_snapshot(&RoomId::new("chat:nowhere"))
            .is_empty());
    }
}
