//! Relay pool integration tests

use super::*;
use nostr_sync::{ClientError, ConnectionState, RelayPool};

const DEAD_RELAY: &str = "ws://127.0.0.1:1";

#[tokio::test]
async fn test_connect_all_reports_per_relay_state() {
    let relay = MockRelay::start().await;
    let client = SyncClient::new(test_config(vec![relay.url(), DEAD_RELAY.to_string()]));
    let mut events = client.subscribe();

    let states = client.connect().await;
    assert_eq!(states.get(&relay.url()), Some(&ConnectionState::Connected));
    assert_eq!(states.get(DEAD_RELAY), Some(&ConnectionState::Failed));
    assert_eq!(client.pool().connected_count().await, 1);

    let failed = wait_for(&mut events, |event| match event {
        SyncEvent::RelayStateChanged { url, state } if state == ConnectionState::Failed => Some(url),
        _ => None,
    })
    .await;
    assert_eq!(failed, DEAD_RELAY);

    client.shutdown().await;
}

#[tokio::test]
async fn test_toggle_disconnects_then_reconnects() {
    let relay = MockRelay::start().await;
    let client = connected_client(&[&relay]).await;
    let pool: &RelayPool = client.pool();

    assert_eq!(pool.toggle(&relay.url()).await.unwrap(), ConnectionState::Disconnected);
    assert!(!pool.is_connected(&relay.url()).await);
    assert!(pool.usable_links().await.is_empty());

    assert_eq!(pool.toggle(&relay.url()).await.unwrap(), ConnectionState::Connected);
    assert!(pool.is_connected(&relay.url()).await);

    client.shutdown().await;
}

#[tokio::test]
async fn test_remove_closes_pending_queries() {
    let relay = MockRelay::with_mode(RelayMode::Silent).await;
    let client = connected_client(&[&relay]).await;
    let link = client.pool().link(&relay.url()).await.unwrap();
    let mut stream = link.query(Filter::new().kinds(vec![1])).unwrap();

    client.pool().remove(&relay.url()).await.unwrap();

    let next = timeout(Duration::from_millis(500), stream.next_event()).await;
    assert!(matches!(next, Ok(None)));
    assert!(client.pool().relay_urls().await.is_empty());
    assert!(matches!(
        client.pool().remove(&relay.url()).await,
        Err(ClientError::UnknownRelay(_))
    ));
}

#[tokio::test]
async fn test_cycle_all_recovers_a_relay() {
    let relay = MockRelay::start().await;
    let client = connected_client(&[&relay]).await;

    client.pool().disconnect_all().await;
    assert_eq!(client.pool().connected_count().await, 0);

    let states = client.pool().cycle_all().await;
    assert_eq!(states.get(&relay.url()), Some(&ConnectionState::Connected));

    client.shutdown().await;
}
