use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::ChatError;
use crate::types::{Identity, RoomId};

/// A persisted chat/shout message. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub room_id: RoomId,
    pub author: Identity,
    pub body: String,
    /// Unix timestamp; monotone per room in storage order.
    pub sent_at: i64,
    /// Room-scoped, strictly increasing, assigned at append time — never by
    /// the client.
    pub sequence_no: i64,
}

/// Durable append-only message persistence, ordered per room.
///
/// Sequence allocation is an arena of per-room counters, each behind its
/// own async mutex: concurrent appends to one room serialize on that
/// counter alone, appends to different rooms never block each other. A
/// counter is seeded lazily from `MAX(sequence_no)` so restarts continue
/// where the table left off.
pub struct MessageStore {
    pool: SqlitePool,
    max_body_len: usize,
    counters: StdMutex<HashMap<RoomId, Arc<Mutex<Option<i64>>>>>,
}

impl MessageStore {
    pub fn new(pool: SqlitePool, max_body_len: usize) -> Self {
        Self {
            pool,
            max_body_len,
            counters: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn init_schema(&self) -> Result<(), ChatError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                room_id     TEXT    NOT NULL,
                sequence_no INTEGER NOT NULL,
                author      TEXT    NOT NULL,
                body        TEXT    NOT NULL,
                sent_at     INTEGER NOT NULL,
                PRIMARY KEY (room_id, sequence_no)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_rooms (
                room_name TEXT PRIMARY KEY,
                author    TEXT NOT NULL,
                friend    TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Validate, assign the room's next sequence number, persist, and
    /// return the stored record.
    ///
    /// Validation happens before the counter is touched so a rejected body
    /// never consumes a sequence number.
    pub async fn append(
        &self,
        room: &RoomId,
        author: &Identity,
        body: &str,
    ) -> Result<StoredMessage, ChatError> {
        if body.is_empty() {
            return Err(ChatError::Validation("empty message body".to_owned()));
        }
        if body.len() > self.max_body_len {
            return Err(ChatError::Validation(format!(
                "message body exceeds {} bytes",
                self.max_body_len
            )));
        }

        let counter = self.counter(room);
        let mut last = counter.lock().await;
        let previous = match *last {
            Some(n) => n,
            None => self.last_sequence(room).await?,
        };
        let sequence_no = previous + 1;
        let sent_at = OffsetDateTime::now_utc().unix_timestamp();

        sqlx::query(
            "INSERT INTO messages (room_id, sequence_no, author, body, sent_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(room.as_str())
        .bind(sequence_no)
        .bind(author.as_str())
        .bind(body)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        *last = Some(sequence_no);
        Ok(StoredMessage {
            room_id: room.clone(),
            author: author.clone(),
            body: body.to_owned(),
            sent_at,
            sequence_no,
        })
    }

    /// The most recent messages strictly before `before` (all of them when
    /// no cursor is given), at most `limit`, returned in ascending
    /// sequence order.
    ///
    /// A cursorless read of a room with no stored messages is `NotFound`;
    /// an empty page under a cursor is a valid result.
    pub async fn history(
        &self,
        room: &RoomId,
        before: Option<i64>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let rows: Vec<(i64, String, String, i64)> = match before {
            Some(cursor) => {
                sqlx::query_as(
                    "SELECT sequence_no, author, body, sent_at FROM messages
                     WHERE room_id = ? AND sequence_no < ?
                     ORDER BY sequence_no DESC LIMIT ?",
                )
                .bind(room.as_str())
                .bind(cursor)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT sequence_no, author, body, sent_at FROM messages
                     WHERE room_id = ?
                     ORDER BY sequence_no DESC LIMIT ?",
                )
                .bind(room.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        if rows.is_empty() && before.is_none() {
            return Err(ChatError::NotFound(room.clone()));
        }

        Ok(rows
            .into_iter()
            .rev()
            .map(|(sequence_no, author, body, sent_at)| StoredMessage {
                room_id: room.clone(),
                author: Identity::from(author),
                body,
                sent_at,
                sequence_no,
            })
            .collect())
    }

    /// Drop a room's cached counter once its membership empties, keeping
    /// the arena bounded by live rooms rather than every room ever seen.
    ///
    /// Safe at any point: the next append to the room reseeds from
    /// `MAX(sequence_no)`, and only members append, so no append can be in
    /// flight for a room whose last member has torn down.
    pub fn evict_counter(&self, room: &RoomId) {
        self.counters
            .lock()
            .expect("sequence counter arena poisoned")
            .remove(room);
    }

    #[cfg(test)]
    pub(crate) fn cached_counter_count(&self) -> usize {
        self.counters
            .lock()
            .expect("sequence counter arena poisoned")
            .len()
    }

    fn counter(&self, room: &RoomId) -> Arc<Mutex<Option<i64>>> {
        self.counters
            .lock()
            .expect("sequence counter arena poisoned")
            .entry(room.clone())
            .or_default()
            .clone()
    }

    async fn last_sequence(&self, room: &RoomId) -> Result<i64, ChatError> {
        let (max,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(sequence_no) FROM messages WHERE room_id = ?")
                .bind(room.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0))
    }
}
