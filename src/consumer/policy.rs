use sqlx::SqlitePool;

use crate::error::ChatError;
use crate::types::{Identity, RoomId};

/// Which kind of room a route serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Two-party chat: only the room's author and friend may join.
    Chat,
    /// Shout box: open to any authenticated user.
    Shout,
}

/// The capability that distinguishes the two consumer variants.
///
/// `ChatRoomConsumer` and `ShoutBoxConsumer` run the same state machine;
/// they differ only in how the route parameter becomes a room id and in
/// the authorization rule applied before joining.
#[derive(Debug, Clone, Copy)]
pub struct RoomPolicy {
    kind: RoomKind,
}

impl RoomPolicy {
    pub fn chat() -> Self {
        Self {
            kind: RoomKind::Chat,
        }
    }

    pub fn shout() -> Self {
        Self {
            kind: RoomKind::Shout,
        }
    }

    /// Chat rooms and shout boxes occupy separate namespaces, so the raw
    /// route parameter is always prefixed.
    pub fn derive_room_id(&self, route_param: &str) -> RoomId {
        match self.kind {
            RoomKind::Chat => RoomId::new(format!("chat:{route_param}")),
            RoomKind::Shout => RoomId::new(format!("shout:{route_param}")),
        }
    }

    /// Decide whether `identity` may join the room behind `route_param`.
    ///
    /// For a chat room the identity must be one of the two participants
    /// recorded in `chat_rooms`; an unknown room denies everyone. Shout
    /// boxes admit any authenticated caller.
    pub async fn authorize(
        &self,
        pool: &SqlitePool,
        identity: &Identity,
        route_param: &str,
    ) -> Result<(), ChatError> {
        match self.kind {
            RoomKind::Shout => Ok(()),
            RoomKind::Chat => {
                let participants: Option<(String, String)> =
                    sqlx::query_as("SELECT author, friend FROM chat_rooms WHERE room_name = ?")
                        .bind(route_param)
                        .fetch_optional(pool)
                        .await?;

                let allowed = match &participants {
                    Some((author, friend)) => {
                        identity.as_str() == author || identity.as_str() == friend
                    }
                    None => false,
                };
                if allowed {
                    Ok(())
                } else {
                    Err(ChatError::Unauthorized(self.derive_room_id(route_param)))
                }
            }
        }
    }
}
