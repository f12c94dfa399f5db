//! End-to-end tests: a real server on port 0 driven by `SubscriptionClient`
//! and raw `tokio-tungstenite` sockets.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::StreamExt;
use presence_client::{ClientConfig, ClientEvent, SubscriptionClient};
use presence_core::CommandKind;
use presence_server::{ServerConfig, SubscribeServer};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fast_config() -> ServerConfig {
    ServerConfig {
        heartbeat_interval_ms: 0,
        subscribe_delay_ms: 5,
        unsubscribe_delay_ms: 10,
        ..ServerConfig::default()
    }
}

/// Boot a test server and return its WS URL.
async fn boot_server(config: ServerConfig) -> (String, Arc<SubscribeServer>) {
    let server = Arc::new(SubscribeServer::new(config));
    let addr = server.listen(0).await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> (SubscriptionClient, broadcast::Receiver<ClientEvent>) {
    let client = SubscriptionClient::new(ClientConfig::new(url));
    let events = client.events();
    client.connect().await.unwrap();
    (client, events)
}

/// Next event other than `Open`.
async fn next_reply(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    loop {
        let event = timeout(TIMEOUT, events.recv())
            .await
            .expect("timeout waiting for event")
            .expect("event channel closed");
        if event != ClientEvent::Open {
            return event;
        }
    }
}

async fn count(client: &SubscriptionClient, events: &mut broadcast::Receiver<ClientEvent>) -> u64 {
    client.subscribers_count().unwrap();
    match next_reply(events).await {
        ClientEvent::Count { count, updated_at } => {
            assert!(updated_at > 0);
            count
        }
        other => panic!("expected count, got {other:?}"),
    }
}

async fn subscribed(events: &mut broadcast::Receiver<ClientEvent>) -> i64 {
    match next_reply(events).await {
        ClientEvent::Subscribed { updated_at } => updated_at.expect("subscribed without date"),
        other => panic!("expected subscribed, got {other:?}"),
    }
}

async fn unsubscribed(events: &mut broadcast::Receiver<ClientEvent>) -> i64 {
    match next_reply(events).await {
        ClientEvent::Unsubscribed { updated_at } => {
            updated_at.expect("unsubscribed without date")
        }
        other => panic!("expected unsubscribed, got {other:?}"),
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn subscribe_is_idempotent() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;

    client.subscribe().unwrap();
    let first = subscribed(&mut events).await;
    client.subscribe().unwrap();
    let second = subscribed(&mut events).await;

    assert!(first > 0);
    assert_eq!(first, second);
    assert_eq!(count(&client, &mut events).await, 1);

    client.unsubscribe().unwrap();
    let third = unsubscribed(&mut events).await;
    client.subscribe().unwrap();
    let fourth = subscribed(&mut events).await;

    assert!(third >= first);
    assert!(fourth > third);
    assert_eq!(count(&client, &mut events).await, 1);
    server.graceful_shutdown();
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;

    client.subscribe().unwrap();
    let _ = subscribed(&mut events).await;
    client.unsubscribe().unwrap();
    let first = unsubscribed(&mut events).await;
    client.unsubscribe().unwrap();
    let second = unsubscribed(&mut events).await;

    assert_eq!(first, second);
    assert_eq!(count(&client, &mut events).await, 0);

    client.subscribe().unwrap();
    let third = subscribed(&mut events).await;
    client.unsubscribe().unwrap();
    let fourth = unsubscribed(&mut events).await;

    assert!(third >= first);
    assert!(fourth > third);
    assert_eq!(count(&client, &mut events).await, 0);
    server.graceful_shutdown();
}

#[tokio::test]
async fn count_tracks_multiple_clients() {
    let (url, server) = boot_server(fast_config()).await;
    let (a, mut a_events) = connect(&url).await;
    let (b, mut b_events) = connect(&url).await;

    assert_eq!(count(&a, &mut a_events).await, 0);

    a.subscribe().unwrap();
    let _ = subscribed(&mut a_events).await;
    assert_eq!(count(&b, &mut b_events).await, 1);

    a.subscribe().unwrap();
    let _ = subscribed(&mut a_events).await;
    assert_eq!(count(&a, &mut a_events).await, 1);

    b.subscribe().unwrap();
    let _ = subscribed(&mut b_events).await;
    assert_eq!(count(&a, &mut a_events).await, 2);

    a.unsubscribe().unwrap();
    let _ = unsubscribed(&mut a_events).await;
    assert_eq!(count(&b, &mut b_events).await, 1);

    server.graceful_shutdown();
}

#[tokio::test]
async fn bad_payload_gets_error_reply() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;

    client.send("Non JSON").unwrap();

    assert_matches!(next_reply(&mut events).await, ClientEvent::ProtocolError { message: Some(m), .. } => {
        assert_eq!(m.kind, CommandKind::Error);
        assert_eq!(m.error.as_deref(), Some("Bad formatted payload, non JSON"));
        assert!(m.updated_at.unwrap() > 0);
    });
    assert!(client.is_connected());
    server.graceful_shutdown();
}

#[tokio::test]
async fn unknown_command_gets_error_reply() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;

    client.send_json(&serde_json::json!({ "type": "Unknown" })).unwrap();

    assert_matches!(next_reply(&mut events).await, ClientEvent::ProtocolError { message: Some(m), .. } => {
        assert_eq!(m.kind, CommandKind::Error);
        assert_eq!(m.error.as_deref(), Some("Requested method not implemented"));
        assert!(m.updated_at.unwrap() > 0);
    });

    // The connection stays usable after a protocol error.
    assert_eq!(count(&client, &mut events).await, 0);
    server.graceful_shutdown();
}

#[tokio::test]
async fn disconnect_clears_subscription() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;

    client.subscribe().unwrap();
    let _ = subscribed(&mut events).await;
    assert_eq!(server.registry().subscribers_count(), 1);

    client.close().unwrap();
    assert_matches!(next_reply(&mut events).await, ClientEvent::Close { code: 1000, .. });

    eventually(|| server.registry().subscribers_count() == 0).await;
    eventually(|| server.connections().is_empty()).await;
    server.graceful_shutdown();
}

#[tokio::test]
async fn silent_connection_is_terminated() {
    let (url, server) = boot_server(ServerConfig {
        heartbeat_interval_ms: 100,
        ..fast_config()
    })
    .await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

    let mut heartbeats = 0;
    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    assert!(text.as_str().contains(r#""type":"Heartbeat""#));
                    heartbeats += 1;
                }
                Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;

    assert!(ended.is_ok(), "silent connection was never terminated");
    assert_eq!(heartbeats, 1);
    eventually(|| server.connections().is_empty()).await;
    server.graceful_shutdown();
}

#[tokio::test]
async fn responsive_client_survives_heartbeats() {
    let (url, server) = boot_server(ServerConfig {
        heartbeat_interval_ms: 50,
        ..fast_config()
    })
    .await;
    let (client, mut events) = connect(&url).await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(client.is_connected());
    assert_eq!(count(&client, &mut events).await, 0);
    assert_eq!(server.connections().len(), 1);
    server.graceful_shutdown();
}

#[tokio::test]
async fn graceful_shutdown_closes_clients_with_going_away() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;
    assert_eq!(count(&client, &mut events).await, 0);

    server.graceful_shutdown();

    assert_matches!(next_reply(&mut events).await, ClientEvent::Close { code: 1001, reason } => {
        assert_eq!(reason, "Server shutting down");
    });
    assert!(server.drain(TIMEOUT).await);
}

#[tokio::test]
async fn graceful_shutdown_cancels_pending_subscribe() {
    let (url, server) = boot_server(ServerConfig {
        subscribe_delay_ms: 60_000,
        ..fast_config()
    })
    .await;
    let (client, mut events) = connect(&url).await;

    client.subscribe().unwrap();
    // Replies on one connection follow arrival order, so the subscribe is scheduled.
    assert_eq!(count(&client, &mut events).await, 0);

    server.graceful_shutdown();
    server.graceful_shutdown();

    assert_matches!(next_reply(&mut events).await, ClientEvent::Close { code: 1001, .. });
    assert_eq!(server.registry().subscribers_count(), 0);
}

#[tokio::test]
async fn connect_twice_is_a_no_op() {
    let (url, server) = boot_server(fast_config()).await;
    let (client, mut events) = connect(&url).await;

    client.connect().await.unwrap();

    assert!(client.is_connected());
    assert_eq!(count(&client, &mut events).await, 0);
    assert_eq!(server.connections().len(), 1);
    server.graceful_shutdown();
}

#[tokio::test]
async fn root_path_also_upgrades() {
    let server = Arc::new(SubscribeServer::new(fast_config()));
    let addr = server.listen(0).await.unwrap();
    let (client, mut events) = connect(&format!("ws://{addr}")).await;

    assert_eq!(count(&client, &mut events).await, 0);
    server.graceful_shutdown();
}
