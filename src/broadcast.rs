use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::directory::RoomDirectory;
use crate::error::ChatError;
use crate::frame::OutboundFrame;
use crate::registry::ConnectionRegistry;
use crate::store::{MessageStore, StoredMessage};
use crate::types::{Identity, RoomId};

/// Fans persisted messages out to room members.
///
/// `publish` is the ordering point: it holds a per-room order lock across
/// append + fanout, so two publishers racing on one room fan out in
/// sequence-number order while distinct rooms proceed fully in parallel.
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    store: Arc<MessageStore>,
    order_locks: StdMutex<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl BroadcastEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<RoomDirectory>,
        store: Arc<MessageStore>,
    ) -> Self {
        Self {
            registry,
            directory,
            store,
            order_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Persist one message and deliver it to the room's current members.
    ///
    /// The author is a member too, so a successful publish echoes the
    /// message back to the sender through the same fanout.
    pub async fn publish(
        &self,
        room: &RoomId,
        author: &Identity,
        body: &str,
    ) -> Result<StoredMessage, ChatError> {
        let order = self.order_lock(room);
        let _ordered = order.lock().await;

        let message = self.store.append(room, author, body).await?;
        self.fanout(room, &OutboundFrame::from(&message));
        Ok(message)
    }

    /// Deliver one frame to the membership snapshot taken at call time.
    ///
    /// Each member is attempted independently, at most once: a connection
    /// that vanished between snapshot and send, or whose writer is gone, is
    /// logged and skipped, never retried, and never aborts the rest. Zero
    /// members is a normal no-op. Returns the number of queued deliveries.
    pub fn fanout(&self, room: &RoomId, frame: &OutboundFrame) -> usize {
        let members = self.directory.members_snapshot(room);
        let mut delivered = 0;

        for member in members {
            let Some(connection) = self.registry.get(member) else {
                debug!(room = %room, connection = %member, "member vanished before delivery");
                continue;
            };
            if connection.sender.send(frame.clone()).is_err() {
                warn!(room = %room, connection = %member, "dropped delivery: writer gone");
                continue;
            }
            delivered += 1;
        }

        delivered
    }

    /// Drop a room's order lock once its membership empties; only members
    /// publish, so nothing can hold it past the last member's teardown.
    pub fn evict_order_lock(&self, room: &RoomId) {
        self.order_locks
            .lock()
            .expect("order lock arena poisoned")
            .remove(room);
    }

    #[cfg(test)]
    pub(crate) fn cached_order_lock_count(&self) -> usize {
        self.order_locks
            .lock()
            .expect("order lock arena poisoned")
            .len()
    }

    fn order_lock(&self, room: &RoomId) -> Arc<Mutex<()>> {
        self.order_locks
            .lock()
            .expect("order lock arena poisoned")
            .entry(room.clone())
            .or_default()
            .clone()
    }
}
