mod policy;

pub use policy::RoomPolicy;

use std::sync::Arc;

use axum::{
    Router, debug_handler,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message as WsMessage, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_sessions::Session;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastEngine;
use crate::directory::RoomDirectory;
use crate::error::ChatError;
use crate::frame::{InboundFrame, OutboundFrame};
use crate::registry::ConnectionRegistry;
use crate::session;
use crate::store::MessageStore;
use crate::types::{ConnectionId, Identity, RoomId};
use crate::{AppResult, AppState};

const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// The websocket route table. These two patterns are the public contract.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/chat/{room_name}/", get(chat_ws))
        .route("/ws/shout/{shoutbox_id}/", get(shout_ws))
}

#[derive(Debug, Deserialize)]
struct BackfillQuery {
    /// How many stored messages to replay before going live. Optional;
    /// clamped to the configured page cap.
    backfill: Option<u32>,
}

#[debug_handler(state = crate::AppState)]
async fn chat_ws(
    Path(room_name): Path<String>,
    Query(query): Query<BackfillQuery>,
    State(app): State<AppState>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    upgrade(RoomPolicy::chat(), room_name, query, app, session, ws).await
}

#[debug_handler(state = crate::AppState)]
async fn shout_ws(
    Path(shoutbox_id): Path<String>,
    Query(query): Query<BackfillQuery>,
    State(app): State<AppState>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    upgrade(RoomPolicy::shout(), shoutbox_id, query, app, session, ws).await
}

async fn upgrade(
    policy: RoomPolicy,
    route_param: String,
    query: BackfillQuery,
    app: AppState,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let identity = session::resolve_identity(&session).await?;
    Ok(ws.on_upgrade(async move |socket| {
        RoomConsumer::new(app, policy, route_param, identity, query.backfill)
            .run(socket)
            .await;
    }))
}

/// Lifecycle of one connection's protocol handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    Connecting,
    Authorizing,
    Joined,
    Closing,
    Closed,
}

/// The per-connection protocol state machine, shared by both room kinds
/// and parameterized by `RoomPolicy`.
pub struct RoomConsumer {
    app: AppState,
    policy: RoomPolicy,
    route_param: String,
    identity: Option<Identity>,
    backfill: Option<u32>,
    state: ConsumerState,
}

impl RoomConsumer {
    pub fn new(
        app: AppState,
        policy: RoomPolicy,
        route_param: String,
        identity: Option<Identity>,
        backfill: Option<u32>,
    ) -> Self {
        Self {
            app,
            policy,
            route_param,
            identity,
            backfill,
            state: ConsumerState::Connecting,
        }
    }

    pub async fn run(mut self, socket: WebSocket) {
        // The transport handshake was accepted by the upgrade.
        self.transition(ConsumerState::Authorizing);
        let room_id = self.policy.derive_room_id(&self.route_param);

        let Some(identity) = self.identity.clone() else {
            warn!(room = %room_id, "unauthenticated caller");
            self.close(socket, CLOSE_POLICY_VIOLATION, "unauthenticated")
                .await;
            return;
        };

        if let Err(err) = self
            .policy
            .authorize(&self.app.db_pool, &identity, &self.route_param)
            .await
        {
            let code = match err {
                ChatError::Unauthorized(_) => CLOSE_POLICY_VIOLATION,
                _ => CLOSE_INTERNAL_ERROR,
            };
            warn!(room = %room_id, identity = %identity, %err, "join denied");
            self.close(socket, code, "join denied").await;
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();

        // Client-requested backfill is queued before the live join, so
        // replayed history precedes anything fanned out after registration.
        if let Some(requested) = self.backfill {
            let limit = requested.min(self.app.config.history_page_cap);
            match self.app.store.history(&room_id, None, limit).await {
                Ok(page) => {
                    for message in &page {
                        let _ = tx.send(OutboundFrame::from(message));
                    }
                }
                Err(ChatError::NotFound(_)) => {} // nothing stored yet
                Err(err) => {
                    warn!(room = %room_id, %err, "backfill failed, joining without it");
                }
            }
        }

        let connection_id = self.app.registry.register(identity.clone(), tx.clone());
        self.app.directory.join(&room_id, connection_id);
        self.app.registry.mark_joined(connection_id, &room_id);

        // Membership release rides on drop so every exit path, including
        // task cancellation on transport drop, unwinds through it.
        let membership = MembershipGuard {
            registry: Arc::clone(&self.app.registry),
            directory: Arc::clone(&self.app.directory),
            store: Arc::clone(&self.app.store),
            engine: Arc::clone(&self.app.engine),
            room: room_id.clone(),
            connection: connection_id,
        };

        self.transition(ConsumerState::Joined);
        info!(room = %room_id, connection = %connection_id, identity = %identity, "joined");

        let (mut sink, mut stream) = socket.split();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(inbound)) = stream.next().await {
            match inbound {
                WsMessage::Text(text) => {
                    self.handle_text(&room_id, &identity, &tx, text.as_str()).await;
                }
                WsMessage::Close(_) => break,
                // Ping/pong are answered by the transport layer.
                _ => {}
            }
        }

        self.transition(ConsumerState::Closing);
        writer.abort();
        drop(membership);
        self.transition(ConsumerState::Closed);
        info!(room = %room_id, connection = %connection_id, "disconnected");
    }

    /// One inbound text frame while joined.
    ///
    /// A frame that fails to decode is dropped without touching the store
    /// or the sequence counters. A decoded frame that cannot be accepted
    /// is acknowledged to the sender with an error frame — the sender's
    /// own message is never silently dropped past this point.
    async fn handle_text(
        &self,
        room: &RoomId,
        identity: &Identity,
        tx: &mpsc::UnboundedSender<OutboundFrame>,
        text: &str,
    ) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(room = %room, %err, "malformed frame dropped");
                return;
            }
        };

        match self.app.engine.publish(room, identity, &frame.message).await {
            Ok(stored) => {
                debug!(room = %room, sequence_no = stored.sequence_no, "published");
            }
            Err(err @ ChatError::Validation(_)) => {
                let _ = tx.send(OutboundFrame::error(err.to_string()));
            }
            Err(err) => {
                warn!(room = %room, %err, "append failed, acking sender");
                let _ = tx.send(OutboundFrame::error("message not delivered, try again"));
            }
        }
    }

    async fn close(&mut self, mut socket: WebSocket, code: u16, reason: &'static str) {
        self.transition(ConsumerState::Closing);
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
        self.transition(ConsumerState::Closed);
    }

    fn transition(&mut self, next: ConsumerState) {
        debug!(from = ?self.state, to = ?next, "consumer state");
        self.state = next;
    }
}

/// Scoped room membership: leaving the directory and registry is tied to
/// drop, and both operations are idempotent, so unwinding a consumer that
/// never fully joined is safe too. When this leave empties the room, the
/// per-room counter and order-lock arena entries are released with it.
struct MembershipGuard {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    store: Arc<MessageStore>,
    engine: Arc<BroadcastEngine>,
    room: RoomId,
    connection: ConnectionId,
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        let emptied = self.directory.leave(&self.room, self.connection);
        self.registry.mark_left(self.connection, &self.room);
        self.registry.unregister(self.connection);
        if emptied {
            self.store.evict_counter(&self.room);
            self.engine.evict_order_lock(&self.room);
        }
    }
}
