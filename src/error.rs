use thiserror::Error;

use crate::types::RoomId;

/// Failures inside the delivery core.
///
/// Per-connection failures stay inside that connection's task; a failed
/// append blocks only the room it was addressed to.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Oversized or empty message body, rejected before a sequence number
    /// is allocated.
    #[error("invalid message: {0}")]
    Validation(String),

    /// The caller may not join this room. The connection is closed with a
    /// policy-violation close code.
    #[error("not authorized to join {0}")]
    Unauthorized(RoomId),

    /// History was requested without a cursor for a room that has no
    /// stored messages at all.
    #[error("no messages stored for {0}")]
    NotFound(RoomId),

    /// The persistence backend failed. The message was not broadcast and
    /// the sender gets an explicit error frame so it can retry.
    #[error("message store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}
