use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::frame::OutboundFrame;
use crate::types::{ConnectionId, Identity, RoomId};

/// A cloneable handle to one live connection: who it is and where its
/// outbound frames go. The writer task on the other end of `sender` drains
/// frames into the websocket sink.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub identity: Identity,
    pub sender: mpsc::UnboundedSender<OutboundFrame>,
}

struct Entry {
    connection: Connection,
    joined_rooms: HashSet<RoomId>,
}

/// Every live connection in the process, keyed by connection id.
///
/// Constructed once at startup and passed explicitly to each consumer; it
/// knows nothing about message content. The interior mutex is never held
/// across an await, so drop-based teardown can use it from any exit path.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        identity: Identity,
        sender: mpsc::UnboundedSender<OutboundFrame>,
    ) -> ConnectionId {
        let id = ConnectionId::new();
        let entry = Entry {
            connection: Connection {
                id,
                identity,
                sender,
            },
            joined_rooms: HashSet::new(),
        };
        self.connections
            .lock()
            .expect("connection registry poisoned")
            .insert(id, entry);
        id
    }

    /// Idempotent: disconnect can race a forced eviction, so removing an
    /// already-absent id is a no-op.
    pub fn unregister(&self, id: ConnectionId) {
        self.connections
            .lock()
            .expect("connection registry poisoned")
            .remove(&id);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections
            .lock()
            .expect("connection registry poisoned")
            .get(&id)
            .map(|entry| entry.connection.clone())
    }

    pub fn mark_joined(&self, id: ConnectionId, room: &RoomId) {
        if let Some(entry) = self
            .connections
            .lock()
            .expect("connection registry poisoned")
            .get_mut(&id)
        {
            entry.joined_rooms.insert(room.clone());
        }
    }

    pub fn mark_left(&self, id: ConnectionId, room: &RoomId) {
        if let Some(entry) = self
            .connections
            .lock()
            .expect("connection registry poisoned")
            .get_mut(&id)
        {
            entry.joined_rooms.remove(room);
        }
    }

    pub fn joined_rooms(&self, id: ConnectionId) -> Vec<RoomId> {
        self.connections
            .lock()
            .expect("connection registry poisoned")
            .get(&id)
            .map(|entry| entry.joined_rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .expect("connection registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> mpsc::UnboundedSender<OutboundFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        tx
    }

    #[test]
    fn register_then_get_returns_identity() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(Identity::from("alice"), handle());

        let conn = registry.get(id).unwrap();
        assert_eq!(conn.id, id);
        assert_eq!(conn.identity, Identity::from("alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(Identity::from("alice"), handle());

        registry.unregister(id);
        assert!(registry.get(id).is_none());

        // Second removal of the same id must be a silent no-op.
        registry.unregister(id);
        assert!(registry.is_empty());
    }

    #[test]
    fn joined_rooms_track_join_and_leave() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(Identity::from("bob"), handle());
        let room = RoomId::new("chat:42");

        registry.mark_joined(id, &room);
        assert_eq!(registry.joined_rooms(id), vec![room.clone()]);

        registry.mark_left(id, &room);
        assert!(registry.joined_rooms(id).is_empty());
    }

    #[test]
    fn marks_on_unknown_connection_are_ignored() {
        let registry = ConnectionRegistry::new();
        let stray = ConnectionId::new();
        registry.mark_joined(stray, &RoomId::new("shout:main"));
        assert!(registry.joined_rooms(stray).is_empty());
    }
}
