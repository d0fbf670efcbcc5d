//! Live subscription integration tests

use super::*;
use nostr::reaction_template;
use nostr::unix_now;
use nostr_sync::ClientError;

/// Wait until `relay` has received `count` REQs.
async fn await_requests(relay: &MockRelay, count: usize) {
    timeout(Duration::from_secs(5), async {
        while relay.filters().len() < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay never received the subscription");
}

#[tokio::test]
async fn test_live_events_reach_the_feed_once() {
    let sk = new_key();
    let relay_a = MockRelay::start().await;
    let relay_b = MockRelay::start().await;
    let client = connected_client(&[&relay_a, &relay_b]).await;
    let mut events = client.subscribe();

    let subscribed = client
        .live()
        .subscribe_feed("home", &Filter::new().kinds(vec![1]))
        .await
        .unwrap();
    assert_eq!(subscribed, 2);
    await_requests(&relay_a, 1).await;
    await_requests(&relay_b, 1).await;

    let fresh = note(&sk, "just now", unix_now());
    relay_a.inject(fresh.clone());
    relay_b.inject(fresh.clone());

    let emitted = wait_for(&mut events, |event| match event {
        SyncEvent::FeedUpdated { feed_id, events } if feed_id == "home" => Some(events),
        _ => None,
    })
    .await;
    assert!(emitted.iter().any(|e| e.id == fresh.id));

    // The copy from the second relay is dropped
    let repeat = timeout(Duration::from_millis(300), async {
        loop {
            if let Ok(SyncEvent::FeedUpdated { events, .. }) = events.recv().await
                && events.iter().any(|e| e.id == fresh.id)
            {
                return;
            }
        }
    })
    .await;
    assert!(repeat.is_err());

    let state = client.feeds().feeds().get("home").unwrap();
    assert!(state.lock().await.contains(&fresh.id));

    client.shutdown().await;
}

#[tokio::test]
async fn test_live_reactions_go_to_the_index() {
    let sk = new_key();
    let relay = MockRelay::start().await;
    let client = connected_client(&[&relay]).await;
    let mut events = client.subscribe();

    client
        .live()
        .subscribe_feed("notifications", &Filter::new().kinds(vec![7]))
        .await
        .unwrap();
    await_requests(&relay, 1).await;

    let target = note(&sk, "liked", 100);
    let reaction = SchnorrCodec
        .sign(&reaction_template(&target, "+").at(unix_now()), &new_key())
        .unwrap();
    relay.inject(reaction.clone());

    let reactions = wait_for(&mut events, |event| match event {
        SyncEvent::ReactionsUpdated { reactions } => Some(reactions),
        _ => None,
    })
    .await;
    assert_eq!(reactions[&target.id][0].id, reaction.id);
    assert_eq!(client.reactions().count(&target.id), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_twice_is_a_noop() {
    let relay = MockRelay::start().await;
    let client = connected_client(&[&relay]).await;

    client
        .live()
        .subscribe_feed("home", &Filter::new().kinds(vec![1]))
        .await
        .unwrap();
    await_requests(&relay, 1).await;
    assert!(client.live().is_live("home"));

    client.live().unsubscribe_feed("home").await;
    client.live().unsubscribe_feed("home").await;
    assert!(!client.live().is_live("home"));

    timeout(Duration::from_secs(5), async {
        while relay.closed().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(relay.closed().len(), 1);

    let state = client.feeds().feeds().get("home").unwrap();
    assert_eq!(state.lock().await.active_subscription_count(), 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_closing_a_feed_ends_its_live_subscription() {
    let relay = MockRelay::start().await;
    let client = connected_client(&[&relay]).await;

    client
        .live()
        .subscribe_feed("home", &Filter::new().kinds(vec![1]))
        .await
        .unwrap();
    await_requests(&relay, 1).await;

    assert!(client.feeds().close_feed("home").await);
    timeout(Duration::from_secs(5), async {
        while client.live().is_live("home") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("feed stayed live after close");
    assert!(client.live().live_feeds().is_empty());

    // A fresh subscription for the same feed is tracked again
    client
        .live()
        .subscribe_feed("home", &Filter::new().kinds(vec![1]))
        .await
        .unwrap();
    assert!(client.live().is_live("home"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_subscribe_without_relays_fails_fast() {
    let client = SyncClient::new(test_config(vec![]));
    let result = client
        .live()
        .subscribe_feed("home", &Filter::new().kinds(vec![1]))
        .await;
    assert!(matches!(result, Err(ClientError::NoUsableRelays)));
}
