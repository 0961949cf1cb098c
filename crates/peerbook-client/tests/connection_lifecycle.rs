//! Connection lifecycle against in-memory transports.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use peerbook_client::{ConnectionState, PeerbookConnection, PushStatus, Transports};
use peerbook_core::transport::SessionEvent;
use peerbook_core::{ClientConfig, EntitlementSnapshot, Error, PeerTable, RegistryId};
use peerbook_test_utils::{
    AdminScript, FakePushConnector, FakeSessionFactory, FakeSubscription, READY_ACK, wait_until,
};

struct Harness {
    conn: Arc<PeerbookConnection>,
    sessions: Arc<FakeSessionFactory>,
    push: Arc<FakePushConnector>,
    subscription: Arc<FakeSubscription>,
}

fn harness(sessions: Arc<FakeSessionFactory>, push: Arc<FakePushConnector>) -> Harness {
    let subscription = Arc::new(FakeSubscription::new(EntitlementSnapshot::default()));
    let transports = Transports {
        sessions: sessions.clone(),
        push: push.clone(),
        subscription: subscription.clone(),
    };
    let conn = PeerbookConnection::new(&ClientConfig::new("pb.test", "fp-1"), transports).unwrap();
    Harness {
        conn: Arc::new(conn),
        sessions,
        push,
        subscription,
    }
}

fn registered() -> AdminScript {
    AdminScript::new().reply("ping", "u-1")
}

#[tokio::test]
async fn connect_reaches_active() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::auto_ready(),
    );

    h.conn.connect(Some("rc-1")).await.unwrap();

    assert_eq!(h.conn.state(), ConnectionState::Active);
    assert_eq!(h.conn.push_status(), PushStatus::Open);
    assert_eq!(h.conn.registry_id(), RegistryId::Confirmed("u-1".into()));
    assert!(h.conn.is_open());
    assert_eq!(h.subscription.logins(), ["u-1"]);
    assert_eq!(
        h.push.last().unwrap().url().as_str(),
        "wss://pb.test/ws?fp=fp-1"
    );
}

#[tokio::test]
async fn repeated_connect_creates_one_session() {
    let h = harness(
        FakeSessionFactory::manual(&registered()),
        FakePushConnector::auto_ready(),
    );

    let first = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.sessions.created() == 1).await);

    // Extra calls while the first is still connecting resolve immediately.
    for _ in 0..5 {
        h.conn.connect(None).await.unwrap();
    }
    assert_eq!(h.sessions.created(), 1);

    h.sessions.last().unwrap().emit(SessionEvent::Connected);
    first.await.unwrap().unwrap();

    h.conn.connect(None).await.unwrap();
    assert_eq!(h.sessions.created(), 1);
    assert_eq!(h.sessions.last().unwrap().connect_calls(), 1);
}

#[tokio::test]
async fn sentinel_identifier_rejects_unregistered() {
    let h = harness(
        FakeSessionFactory::auto_connect(&AdminScript::new().reply("ping", "TBD")),
        FakePushConnector::auto_ready(),
    );

    assert!(matches!(h.conn.connect(None).await, Err(Error::Unregistered)));
    assert!(h.conn.registry_id().is_unregistered());
    assert_eq!(h.push.opened(), 0);

    // The session is kept; connecting again rejects without a new session.
    assert!(h.conn.has_session());
    assert!(matches!(h.conn.connect(None).await, Err(Error::Unregistered)));
    assert_eq!(h.sessions.created(), 1);
}

#[tokio::test]
async fn session_failure_with_sentinel_rejects_unregistered() {
    let h = harness(
        FakeSessionFactory::manual(&registered()),
        FakePushConnector::auto_ready(),
    );
    h.conn.set_registry_id(RegistryId::Unregistered);

    let pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.sessions.created() == 1).await);
    let session = h.sessions.last().unwrap();
    session.emit(SessionEvent::Failed("dtls timeout".into()));

    assert!(matches!(pending.await.unwrap(), Err(Error::Unregistered)));
    assert!(!h.conn.has_session());
    assert!(session.is_closed());
    assert!(!session.has_handler());
}

#[tokio::test]
async fn close_is_idempotent_and_detaches_everything() {
    let never = harness(
        FakeSessionFactory::manual(&registered()),
        FakePushConnector::manual(),
    );
    never.conn.close();
    never.conn.close();
    assert_eq!(never.conn.state(), ConnectionState::Idle);

    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::auto_ready(),
    );
    let updates = Arc::new(Mutex::new(Vec::<Value>::new()));
    h.conn.set_update_handler({
        let updates = Arc::clone(&updates);
        move |m| updates.lock().unwrap().push(m)
    });
    h.conn.connect(None).await.unwrap();
    let seen = updates.lock().unwrap().len();

    h.conn.close();
    h.conn.close();

    let session = h.sessions.last().unwrap();
    let socket = h.push.last().unwrap();
    assert!(session.is_closed());
    assert!(!session.has_handler());
    assert!(!socket.has_handler());
    assert_eq!(socket.close_calls(), 1);
    assert!(!h.conn.has_session());
    assert!(!h.conn.is_open());
    assert_eq!(h.conn.registry_id(), RegistryId::Unset);
    assert_eq!(h.conn.state(), ConnectionState::Idle);
    assert_eq!(h.conn.push_status(), PushStatus::Closed);

    // Driving the old transports does nothing.
    assert!(!session.emit(SessionEvent::Failed("late".into())));
    assert!(!socket.deliver(r#"{"peers":[]}"#));
    assert!(!socket.remote_close());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(updates.lock().unwrap().len(), seen);
    assert_eq!(h.conn.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn close_during_connect_rejects_and_ignores_late_events() {
    let h = harness(
        FakeSessionFactory::manual(&registered()),
        FakePushConnector::manual(),
    );
    let pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.sessions.created() == 1).await);
    let session = h.sessions.last().unwrap();
    assert!(wait_until(|| session.connect_calls() == 1).await);

    h.conn.close();
    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionClosed)));
    assert!(!session.emit(SessionEvent::Connected));
    assert_eq!(session.requests_named("ping"), 0);
}

#[tokio::test]
async fn is_open_follows_socket_state() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::manual(),
    );
    assert!(!h.conn.is_open());

    let pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.push.opened() == 1).await);
    let socket = h.push.last().unwrap();

    // Session up, socket still connecting.
    assert!(h.conn.has_session());
    assert!(!h.conn.is_open());
    assert_eq!(h.conn.state(), ConnectionState::Identified);
    assert_eq!(h.conn.push_status(), PushStatus::Connecting);

    socket.open();
    assert!(h.conn.is_open());

    socket.deliver(READY_ACK);
    pending.await.unwrap().unwrap();
    assert_eq!(h.conn.state(), ConnectionState::Active);

    socket.remote_close();
    assert!(wait_until(|| !h.conn.is_open()).await);
    let mut status = h.conn.watch_push_status();
    status
        .wait_for(|s| *s == PushStatus::Closed)
        .await
        .unwrap();
    assert_eq!(h.conn.state(), ConnectionState::Identified);
}

#[tokio::test]
async fn queued_messages_flush_in_order_exactly_once() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::manual(),
    );
    for i in 0..3 {
        h.conn.send(json!({"seq": i}));
    }
    assert_eq!(h.conn.queued(), 3);

    let pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.push.opened() == 1).await);
    let socket = h.push.last().unwrap();
    socket.open();
    socket.deliver(READY_ACK);
    pending.await.unwrap().unwrap();

    assert!(wait_until(|| socket.sent().len() == 3).await);
    assert_eq!(
        socket.sent(),
        [r#"{"seq":0}"#, r#"{"seq":1}"#, r#"{"seq":2}"#]
    );
    assert_eq!(h.conn.queued(), 0);

    // A later message goes straight out; nothing is sent twice.
    h.conn.send(json!({"seq": 3}));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(socket.sent().len(), 4);
    assert_eq!(socket.sent()[3], r#"{"seq":3}"#);
}

#[tokio::test]
async fn send_before_open_event_keeps_queue_order() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::manual(),
    );
    h.conn.send(json!({"seq": 0}));

    let pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.push.opened() == 1).await);
    let socket = h.push.last().unwrap();

    // The socket reports open before its open event reaches the connection.
    socket.open();
    assert!(h.conn.is_open());
    h.conn.send(json!({"seq": 1}));
    assert_eq!(h.conn.queued(), 2);
    assert!(socket.sent().is_empty());

    socket.deliver(READY_ACK);
    pending.await.unwrap().unwrap();
    assert!(wait_until(|| socket.sent().len() == 2).await);
    assert_eq!(socket.sent(), [r#"{"seq":0}"#, r#"{"seq":1}"#]);
    assert_eq!(h.conn.queued(), 0);
}

#[tokio::test]
async fn socket_lost_before_flush_keeps_queue() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::manual(),
    );
    h.conn.send(json!({"seq": 0}));

    let _pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.push.opened() == 1).await);
    let socket = h.push.last().unwrap();
    socket.open();
    socket.fail("reset by peer");

    assert!(wait_until(|| h.conn.push_status() == PushStatus::Error).await);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(socket.sent().is_empty());
    assert_eq!(h.conn.queued(), 1);
}

#[tokio::test]
async fn push_error_rejects_pending_connect() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::manual(),
    );
    let pending = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect(None).await }
    });
    assert!(wait_until(|| h.push.opened() == 1).await);
    h.push.last().unwrap().fail("handshake refused");

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    assert_eq!(h.conn.push_status(), PushStatus::Error);
    assert!(!h.conn.is_open());
    // The session survives a push failure.
    assert!(h.conn.has_session());
}

#[tokio::test]
async fn close_after_error_keeps_error_status() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::auto_ready(),
    );
    h.conn.connect(None).await.unwrap();
    let socket = h.push.last().unwrap();

    socket.deliver(r#"{"code":500}"#);
    socket.remote_close();
    assert!(wait_until(|| !h.conn.is_open()).await);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(h.conn.push_status(), PushStatus::Error);
}

#[tokio::test]
async fn connect_push_replaces_stale_socket() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::manual(),
    );
    let first = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect_push().await }
    });
    assert!(wait_until(|| h.push.opened() == 1).await);
    let stale = h.push.last().unwrap();

    let second = tokio::spawn({
        let conn = Arc::clone(&h.conn);
        async move { conn.connect_push().await }
    });
    assert!(wait_until(|| h.push.opened() == 2).await);
    assert!(!stale.has_handler());
    assert_eq!(stale.close_calls(), 1);

    let fresh = h.push.last().unwrap();
    fresh.open();
    fresh.deliver(READY_ACK);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Already open: resolves without a new socket.
    h.conn.connect_push().await.unwrap();
    assert_eq!(h.push.opened(), 2);
}

#[tokio::test]
async fn updates_feed_peer_table() {
    let h = harness(
        FakeSessionFactory::auto_connect(&registered()),
        FakePushConnector::auto_ready(),
    );
    let table = Arc::new(Mutex::new(PeerTable::new(ClientConfig::default().peer_kind)));
    h.conn.set_update_handler({
        let table = Arc::clone(&table);
        move |update| {
            if let Some(peers) = update.get("peers").and_then(Value::as_array) {
                table.lock().unwrap().merge(peers.iter().cloned());
            }
        }
    });
    h.conn.connect(None).await.unwrap();

    let socket = h.push.last().unwrap();
    socket.deliver(
        r#"{"peers":[{"name":"srv","kind":"webexec","online":false},{"name":"phone","kind":"client"}]}"#,
    );
    socket.deliver(r#"{"peers":[{"name":"srv","kind":"webexec","verified":true}]}"#);
    socket.deliver(r#"{"peers":[{"name":"srv","kind":"webexec","online":true}]}"#);
    socket.deliver("not json");

    assert!(wait_until(|| {
        table
            .lock()
            .unwrap()
            .get("srv")
            .is_some_and(|p| p.online)
    })
    .await);
    let table = table.lock().unwrap();
    assert!(table.get("srv").unwrap().verified);
    assert_eq!(table.len(), 1);
    assert!(table.get("phone").is_none());
}
