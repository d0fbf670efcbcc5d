//! Query executor integration tests

use super::*;
use nostr::public_key_hex;
use std::collections::HashSet;
use std::time::Instant;

#[tokio::test]
async fn test_query_never_returns_duplicates() {
    let sk = new_key();
    let shared: Vec<Event> = (0..4).map(|i| note(&sk, &format!("note {}", i), 1000 + i)).collect();

    let relay_a = MockRelay::start().await;
    let relay_b = MockRelay::start().await;
    relay_a.seed(shared.clone());
    relay_b.seed(shared.clone());

    let client = connected_client(&[&relay_a, &relay_b]).await;
    let results = client.query(&Filter::new().kinds(vec![1]).limit(10)).await;

    let ids: HashSet<&str> = results.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids.len(), results.len());
    assert_eq!(results.len(), 4);

    client.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_delivery_still_yields_distinct_pair() {
    let sk = new_key();
    let author = public_key_hex(&sk).unwrap();
    let e1 = note(&sk, "first", 100);
    let e2 = note(&sk, "second", 110);

    let relay_a = MockRelay::start().await;
    let relay_b = MockRelay::start().await;
    relay_a.seed([e1.clone(), e1.clone()]);
    relay_b.seed([e2.clone()]);

    let client = connected_client(&[&relay_a, &relay_b]).await;
    let filter = Filter::new().kinds(vec![1]).authors(vec![author]).limit(2);
    let results = client.query(&filter).await;

    let ids: HashSet<String> = results.into_iter().map(|e| e.id).collect();
    assert_eq!(ids, HashSet::from([e1.id, e2.id]));

    client.shutdown().await;
}

#[tokio::test]
async fn test_query_returns_at_limit_without_waiting_on_slow_relays() {
    let sk = new_key();
    let relay_a = MockRelay::start().await;
    let relay_b = MockRelay::start().await;
    let silent = MockRelay::with_mode(RelayMode::Silent).await;
    relay_a.seed((0..3).map(|i| note(&sk, &format!("a{}", i), 2000 + i)));
    relay_b.seed((0..3).map(|i| note(&sk, &format!("b{}", i), 3000 + i)));

    let config = test_config(vec![
        relay_a.url(),
        relay_b.url(),
        silent.url(),
        "ws://127.0.0.1:1".to_string(),
    ])
    .with_timeouts(2, 5);
    let client = SyncClient::new(config);
    client.connect().await;
    assert_eq!(client.pool().connected_count().await, 3);

    let started = Instant::now();
    let results = client.query(&Filter::new().kinds(vec![1])).await;

    assert_eq!(results.len(), 5);
    assert!(started.elapsed() < Duration::from_secs(4));

    client.shutdown().await;
}

#[tokio::test]
async fn test_query_applies_default_limit_to_requests() {
    let relay = MockRelay::start().await;
    let client = connected_client(&[&relay]).await;

    client.query(&Filter::new().kinds(vec![1])).await;

    let filters = relay.filters();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].limit, Some(5));

    client.shutdown().await;
}

#[tokio::test]
async fn test_query_with_only_silent_relays_times_out_empty() {
    let silent = MockRelay::with_mode(RelayMode::Silent).await;
    let client = connected_client(&[&silent]).await;

    let results = client.query(&Filter::new().kinds(vec![1])).await;
    assert!(results.is_empty());

    client.shutdown().await;
}
