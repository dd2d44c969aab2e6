//! End-to-end flow over the delivery core: join, publish, disconnect.

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;

use roomcast::broadcast::BroadcastEngine;
use roomcast::consumer::RoomPolicy;
use roomcast::directory::RoomDirectory;
use roomcast::error::ChatError;
use roomcast::frame::OutboundFrame;
use roomcast::registry::ConnectionRegistry;
use roomcast::store::MessageStore;
use roomcast::types::{ConnectionId, Identity, RoomId};

struct Core {
    pool: sqlx::SqlitePool,
    registry: Arc<ConnectionRegistry>,
    directory: Arc<RoomDirectory>,
    store: Arc<MessageStore>,
    engine: Arc<BroadcastEngine>,
}

async fn core() -> Core {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let directory = Arc::new(RoomDirectory::new());
    let store = Arc::new(MessageStore::new(pool.clone(), 4096));
    store.init_schema().await.unwrap();
    let engine = Arc::new(BroadcastEngine::new(
        Arc::clone(&registry),
        Arc::clone(&directory),
        Arc::clone(&store),
    ));
    Core {
        pool,
        registry,
        directory,
        store,
        engine,
    }
}

fn join(core: &Core, name: &str, room: &RoomId) -> (ConnectionId, mpsc::UnboundedReceiver<OutboundFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = core.registry.register(Identity::from(name), tx);
    core.directory.join(room, id);
    core.registry.mark_joined(id, room);
    (id, rx)
}

fn disconnect(core: &Core, room: &RoomId, id: ConnectionId) {
    core.directory.leave(room, id);
    core.registry.unregister(id);
}

fn expect_message(frame: OutboundFrame) -> (String, String, i64) {
    match frame {
        OutboundFrame::Message {
            message,
            author,
            sequence_no,
            ..
        } => (message, author, sequence_no),
        OutboundFrame::Error { error } => panic!("unexpected error frame: {error}"),
    }
}

#[tokio::test]
async fn two_party_chat_with_mid_stream_disconnect() {
    let core = core().await;
    let room = RoomPolicy::chat().derive_room_id("42");

    let (a, mut rx_a) = join(&core, "alice", &room);
    let (b, mut rx_b) = join(&core, "bob", &room);

    core.engine
        .publish(&room, &Identity::from("alice"), "hello")
        .await
        .unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let (message, author, sequence_no) = expect_message(rx.recv().await.unwrap());
        assert_eq!(message, "hello");
        assert_eq!(author, "alice");
        assert_eq!(sequence_no, 1);
    }

    // Bob drops; his former slot must become a silent no-op.
    disconnect(&core, &room, b);
    drop(rx_b);

    core.engine
        .publish(&room, &Identity::from("alice"), "bye")
        .await
        .unwrap();

    let (message, _, sequence_no) = expect_message(rx_a.recv().await.unwrap());
    assert_eq!(message, "bye");
    assert_eq!(sequence_no, 2);
    assert_eq!(core.directory.members_snapshot(&room), vec![a]);
}

#[tokio::test]
async fn late_joiner_only_sees_messages_after_its_join() {
    let core = core().await;
    let room = RoomPolicy::shout().derive_room_id("main");
    let alice = Identity::from("alice");

    let (_a, mut rx_a) = join(&core, "alice", &room);
    core.engine.publish(&room, &alice, "early").await.unwrap();

    let (_b, mut rx_b) = join(&core, "bob", &room);
    core.engine.publish(&room, &alice, "late").await.unwrap();

    let (first, _, _) = expect_message(rx_a.recv().await.unwrap());
    assert_eq!(first, "early");
    let (second, _, _) = expect_message(rx_a.recv().await.unwrap());
    assert_eq!(second, "late");

    // Bob joined after "early" was appended; he receives only "late".
    let (only, _, seq) = expect_message(rx_b.recv().await.unwrap());
    assert_eq!(only, "late");
    assert_eq!(seq, 2);
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn explicit_backfill_replays_stored_history_in_order() {
    let core = core().await;
    let room = RoomPolicy::shout().derive_room_id("main");
    let alice = Identity::from("alice");

    for body in ["one", "two", "three"] {
        core.engine.publish(&room, &alice, body).await.unwrap();
    }

    let page = core.store.history(&room, None, 2).await.unwrap();
    let bodies: Vec<&str> = page.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["two", "three"]);
}

#[tokio::test]
async fn unauthorized_join_leaves_the_directory_untouched() {
    let core = core().await;
    sqlx::query("INSERT INTO chat_rooms (room_name, author, friend) VALUES (?, ?, ?)")
        .bind("42")
        .bind("alice")
        .bind("bob")
        .execute(&core.pool)
        .await
        .unwrap();

    let denied = RoomPolicy::chat()
        .authorize(&core.pool, &Identity::from("mallory"), "42")
        .await;
    assert!(matches!(denied, Err(ChatError::Unauthorized(_))));

    // Authorization is checked before any registration, so nothing joined.
    assert_eq!(core.directory.room_count(), 0);
    assert!(core.registry.is_empty());
}

#[tokio::test]
async fn same_user_with_two_connections_gets_two_deliveries() {
    let core = core().await;
    let room = RoomPolicy::shout().derive_room_id("main");

    let (_laptop, mut rx_laptop) = join(&core, "alice", &room);
    let (_phone, mut rx_phone) = join(&core, "alice", &room);

    core.engine
        .publish(&room, &Identity::from("alice"), "hi from the laptop")
        .await
        .unwrap();

    for rx in [&mut rx_laptop, &mut rx_phone] {
        let (message, _, _) = expect_message(rx.recv().await.unwrap());
        assert_eq!(message, "hi from the laptop");
    }
}
