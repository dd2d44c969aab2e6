use tower_sessions::Session;

use crate::AppResult;
use crate::types::Identity;

/// Session key under which login stores the authenticated user id.
pub const USER_ID: &str = "user_id";

/// Resolve the caller's identity from their session cookie.
///
/// Identity is owned by the surrounding application's login flow; the
/// delivery core only reads it. A session backend failure propagates to
/// the HTTP boundary and fails the request before any upgrade happens.
pub async fn resolve_identity(session: &Session) -> AppResult<Option<Identity>> {
    Ok(session.get::<String>(USER_ID).await?.map(Identity::from))
}
