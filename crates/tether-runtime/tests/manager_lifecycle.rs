//! Connection lifecycle integration tests
//!
//! Driven against the stub transport under the paused tokio clock so
//! backoff arithmetic is exact.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use tether_core::{
    Connection, ConnectionId, ManualTimeSource, Message, TetherConfig, TetherError, Timestamp,
    Topic,
};
use tether_runtime::testing::StubConnector;
use tether_runtime::ConnectionRegistry;

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Config with the guard effectively disabled so backoff behavior can be
/// observed in isolation
fn backoff_config() -> TetherConfig {
    let mut config = TetherConfig::default();
    config.guard.failure_threshold = 100;
    config
}

fn state_events<T>(
    registry: &ConnectionRegistry<T>,
) -> mpsc::UnboundedReceiver<Connection>
where
    T: tether_core::TimeSource + Clone + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    registry.on_connection_state_change(move |connection| {
        let _ = tx.send(connection.clone());
    });
    rx
}

fn error_events<T>(
    registry: &ConnectionRegistry<T>,
) -> mpsc::UnboundedReceiver<(Option<ConnectionId>, String)>
where
    T: tether_core::TimeSource + Clone + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    registry.on_error(move |connection_id, error| {
        let _ = tx.send((connection_id, error.to_string()));
    });
    rx
}

async fn next_state(rx: &mut mpsc::UnboundedReceiver<Connection>) -> Connection {
    tokio::time::timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for state event")
        .expect("state channel closed")
}

async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Connection>,
    predicate: impl Fn(&Connection) -> bool,
) -> Connection {
    loop {
        let connection = next_state(rx).await;
        if predicate(&connection) {
            return connection;
        }
    }
}

async fn wait_connected(rx: &mut mpsc::UnboundedReceiver<Connection>) -> Connection {
    wait_for(rx, |c| c.state.is_connected).await
}

// ----------------------------------------------------------------------------
// Connect and auto-subscribe
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_opens_and_subscribes_initial_topics() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    let id = registry.connect("stub://feed", [Topic::new("general")], None);
    let connected = wait_connected(&mut states).await;

    assert_eq!(connected.id, id);
    assert!(connected.state.is_connected);
    assert_eq!(connected.state.reconnect_attempts, 0);
    assert!(connected.state.last_connected_at.is_some());
    assert!(registry.is_connected(id));

    // Exactly one subscription intent, for "general"
    let frames = connector.sent_frames();
    assert_eq!(frames.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(value["type"], "subscribe");
    assert_eq!(value["topic"], "general");
}

// ----------------------------------------------------------------------------
// Exponential backoff with ceiling
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_double_per_attempt() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    registry.connect("stub://feed", [Topic::new("general")], None);
    wait_connected(&mut states).await;

    connector.fail_next_opens(4, "open refused");
    assert!(connector.drop_link(Some("connection lost")));

    let dropped = wait_for(&mut states, |c| c.state.is_idle()).await;
    assert_eq!(dropped.state.reconnect_attempts, 0);
    let start = tokio::time::Instant::now();

    // Retry n begins after min(1000 * 2^(n-1), 30000) ms of accumulated
    // backoff; each scheduled delay doubles after the preceding failure
    let mut observed = Vec::new();
    for attempt in 1..=4u32 {
        wait_for(&mut states, |c| {
            c.state.is_idle() && c.state.reconnect_attempts == attempt
        })
        .await;
        observed.push(start.elapsed());
    }

    assert_eq!(
        observed,
        vec![
            Duration::from_millis(1_000),
            Duration::from_millis(3_000),
            Duration::from_millis(7_000),
            Duration::from_millis(15_000),
        ],
        "delays between attempts should be 1s, 2s, 4s, 8s"
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_is_terminal_until_manual_reconnect() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);
    let mut errors = error_events(&registry);

    let id = registry.connect("stub://feed", [Topic::new("general")], None);
    wait_connected(&mut states).await;

    connector.fail_next_opens(5, "open refused");
    connector.drop_link(None);

    // Budget of 5 burns down, then the exhaustion error surfaces once
    wait_for(&mut states, |c| {
        c.state.is_idle() && c.state.reconnect_attempts == 5
    })
    .await;
    let (error_id, error_text) = tokio::time::timeout(Duration::from_secs(60), errors.recv())
        .await
        .expect("timed out waiting for error event")
        .expect("error channel closed");
    assert_eq!(error_id, Some(id));
    assert!(error_text.contains("exhausted"), "got: {error_text}");

    // 1 initial success + 5 failed retries, and nothing further scheduled
    assert_eq!(connector.open_attempts(), 6);

    // Manual reconnect resets the counter and succeeds
    registry.reconnect(id).await.unwrap();
    let reconnected = wait_connected(&mut states).await;
    assert_eq!(reconnected.state.reconnect_attempts, 0);
    assert_eq!(connector.open_attempts(), 7);
    assert!(registry.is_connected(id));
}

// ----------------------------------------------------------------------------
// Guard gating of open attempts
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_open_guard_stops_hammering_a_dead_endpoint() {
    let clock = ManualTimeSource::starting_at(0);
    let mut config = backoff_config();
    config.guard.failure_threshold = 2;
    config.guard.reset_timeout = Duration::from_secs(600);

    let connector = Arc::new(StubConnector::new());
    connector.fail_next_opens(10, "endpoint down");
    let registry =
        ConnectionRegistry::with_time_source(connector.clone(), config, clock.clone()).unwrap();
    let mut states = state_events(&registry);

    registry.connect("stub://dead", [Topic::new("general")], None);

    wait_for(&mut states, |c| {
        c.state.is_idle() && c.state.reconnect_attempts == 5
    })
    .await;

    // The first open plus one retry reach the connector; after the guard
    // opens at 2 failures the remaining retries are rejected without ever
    // touching the endpoint
    assert_eq!(connector.open_attempts(), 2);
}

// ----------------------------------------------------------------------------
// State exclusivity across a full lifecycle
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connected_and_connecting_never_overlap() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    let id = registry.connect("stub://feed", [Topic::new("general")], None);
    wait_connected(&mut states).await;

    connector.fail_next_opens(2, "flap");
    connector.drop_link(None);
    let reconnected = wait_connected(&mut states).await;
    assert_eq!(reconnected.state.reconnect_attempts, 0);

    registry.disconnect(id).await.unwrap();

    // Drain everything observed along the way
    while let Ok(connection) = states.try_recv() {
        assert!(!(connection.state.is_connected && connection.state.is_connecting));
    }
}

// ----------------------------------------------------------------------------
// Topic filtering
// ----------------------------------------------------------------------------

fn inbound_frame(topic: &str, text: &str) -> String {
    Message::new(
        "chat",
        Topic::new(topic),
        serde_json::json!({ "text": text }),
        None,
        Timestamp::new(1_700_000_000_000),
    )
    .to_frame()
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_messages_filtered_by_topic_set() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    let (message_tx, mut messages) = mpsc::unbounded_channel();
    registry.on_message(move |_, message| {
        let _ = message_tx.send(message.clone());
    });

    registry.connect("stub://feed", [Topic::new("a")], None);
    wait_connected(&mut states).await;

    connector.inject_frame(inbound_frame("a", "first"));
    connector.inject_frame(inbound_frame("b", "never delivered"));
    connector.inject_frame(inbound_frame("a", "second"));

    let first = messages.recv().await.unwrap();
    let second = messages.recv().await.unwrap();
    assert_eq!(first.payload["text"], "first");
    assert_eq!(second.payload["text"], "second");
    assert!(messages.try_recv().is_err(), "topic b leaked through");
}

#[tokio::test(start_paused = true)]
async fn test_wildcard_subscription_receives_every_topic() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    let (message_tx, mut messages) = mpsc::unbounded_channel();
    registry.on_message(move |_, message| {
        let _ = message_tx.send(message.topic.clone());
    });

    registry.connect("stub://feed", [Topic::wildcard()], None);
    wait_connected(&mut states).await;

    connector.inject_frame(inbound_frame("a", "x"));
    connector.inject_frame(inbound_frame("b", "y"));
    connector.inject_frame(inbound_frame("c", "z"));

    assert_eq!(messages.recv().await.unwrap(), Topic::new("a"));
    assert_eq!(messages.recv().await.unwrap(), Topic::new("b"));
    assert_eq!(messages.recv().await.unwrap(), Topic::new("c"));
}

// ----------------------------------------------------------------------------
// Malformed inbound frames
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_reports_error_and_connection_survives() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);
    let mut errors = error_events(&registry);

    let (message_tx, mut messages) = mpsc::unbounded_channel();
    registry.on_message(move |_, message| {
        let _ = message_tx.send(message.clone());
    });

    let id = registry.connect("stub://feed", [Topic::new("a")], None);
    wait_connected(&mut states).await;

    connector.inject_frame("{this is not json");

    let (error_id, error_text) = errors.recv().await.unwrap();
    assert_eq!(error_id, Some(id));
    assert!(error_text.contains("malformed frame"), "got: {error_text}");

    // Still connected, still delivering
    connector.inject_frame(inbound_frame("a", "still alive"));
    let delivered = messages.recv().await.unwrap();
    assert_eq!(delivered.payload["text"], "still alive");
    assert!(registry.is_connected(id));
}

// ----------------------------------------------------------------------------
// TetherError send surface
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_send_while_disconnected_is_not_ready() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    let id = registry.connect("stub://feed", [Topic::new("a")], None);
    wait_connected(&mut states).await;

    connector.fail_next_opens(5, "down");
    connector.drop_link(None);
    wait_for(&mut states, |c| c.state.is_idle()).await;

    let message = Message::new(
        "chat",
        Topic::new("a"),
        serde_json::Value::Null,
        None,
        Timestamp::new(1),
    );
    let result = registry.send(id, message).await;
    assert!(matches!(result, Err(TetherError::NotReady { id: e }) if e == id));
}

#[tokio::test(start_paused = true)]
async fn test_send_while_connected_writes_the_frame() {
    let connector = Arc::new(StubConnector::new());
    let registry = ConnectionRegistry::new(connector.clone(), backoff_config()).unwrap();
    let mut states = state_events(&registry);

    let id = registry.connect("stub://feed", [Topic::new("a")], None);
    wait_connected(&mut states).await;

    let message = Message::new(
        "chat",
        Topic::new("a"),
        serde_json::json!({"text": "outbound"}),
        Some("user-1".to_string()),
        Timestamp::new(9),
    );
    registry.send(id, message.clone()).await.unwrap();

    let frames = connector.sent_frames();
    // Subscription intent plus our message
    assert_eq!(frames.len(), 2);
    let sent = Message::from_frame(&frames[1]).unwrap();
    assert_eq!(sent, message);
}
