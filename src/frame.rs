use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::store::StoredMessage;

/// What a client sends while joined: `{ "message": "..." }`.
///
/// Unknown extra keys are tolerated; a frame that does not decode to this
/// shape is dropped with a warning and the connection stays open.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub message: String,
}

/// What the core writes back to a connection.
///
/// `Message` is the fanout frame every room member receives; `Error` is an
/// acknowledgment sent only to the author when their own message could not
/// be accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Message {
        message: String,
        author: String,
        sent_at: String,
        sequence_no: i64,
    },
    Error {
        error: String,
    },
}

impl OutboundFrame {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            error: reason.into(),
        }
    }
}

impl From<&StoredMessage> for OutboundFrame {
    fn from(message: &StoredMessage) -> Self {
        let sent_at = OffsetDateTime::from_unix_timestamp(message.sent_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            .format(&Rfc3339)
            .unwrap_or_default();

        Self::Message {
            message: message.body.clone(),
            author: message.author.to_string(),
            sent_at,
            sequence_no: message.sequence_no,
        }
    }
}
