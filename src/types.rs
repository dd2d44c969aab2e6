use std::fmt;

use uuid::Uuid;

/// A process-lifetime identifier for one live connection.
///
/// One user may hold several connections at once (two tabs, a phone and a
/// laptop), so membership is tracked per connection, never per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// A room key: either a two-party chat pairing key or a shout-box id.
///
/// Chat rooms and shout boxes live in separate namespaces, so the key is
/// always derived through `RoomPolicy::derive_room_id`, never built by hand
/// from a raw route parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved user reference, immutable once a connection is authorized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(user_id: String) -> Self {
        Self(user_id)
    }
}

impl From<&str> for Identity {
    fn from(user_id: &str) -> Self {
        Self(user_id.to_owned())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
