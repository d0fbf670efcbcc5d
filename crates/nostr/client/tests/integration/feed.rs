//! Feed sync integration tests

use super::*;
use nostr::{public_key_hex, reaction_template, repost_template};
use nostr_sync::ClientError;

fn repost(secret_key: &[u8; 32], original: &Event, created_at: u64) -> Event {
    let template = repost_template(original, None).at(created_at);
    SchnorrCodec.sign(&template, secret_key).unwrap()
}

#[tokio::test]
async fn test_older_profile_versions_do_not_crowd_out_other_authors() {
    let alice_sk = new_key();
    let bob_sk = new_key();
    let alice = public_key_hex(&alice_sk).unwrap();
    let bob = public_key_hex(&bob_sk).unwrap();
    let relay = MockRelay::start().await;
    relay.seed([
        note(&alice_sk, "from alice", 100),
        note(&bob_sk, "from bob", 110),
        profile(&alice_sk, "alice v1", 20),
        profile(&alice_sk, "alice v2", 30),
        profile(&bob_sk, "bob", 10),
    ]);

    let client = connected_client(&[&relay]).await;
    let mut events = client.subscribe();
    let filter = Filter::new().kinds(vec![1]);

    client.feeds().sync("global", &filter).await.unwrap();
    let profiles = wait_for(&mut events, |event| match event {
        SyncEvent::ProfilesResolved { profiles } => Some(profiles),
        _ => None,
    })
    .await;

    assert_eq!(profiles[&alice].metadata.name.as_deref(), Some("alice v2"));
    assert_eq!(profiles[&bob].metadata.name.as_deref(), Some("bob"));
    assert!(client.enricher().profile(&bob).is_some());

    client.shutdown().await;
}

#[tokio::test]
async fn test_sync_emits_notes_and_resolves_authors() {
    let sk = new_key();
    let author = public_key_hex(&sk).unwrap();
    let relay = MockRelay::start().await;
    relay.seed([
        note(&sk, "one", 100),
        note(&sk, "two", 200),
        profile(&sk, "alice", 50),
    ]);

    let client = connected_client(&[&relay]).await;
    let mut events = client.subscribe();
    let filter = Filter::new().kinds(vec![1]).authors(vec![author.clone()]);

    let synced = client.feeds().sync("home", &filter).await.unwrap();
    assert_eq!(synced.len(), 2);
    assert_eq!(synced[0].content, "two");

    let profiles = wait_for(&mut events, |event| match event {
        SyncEvent::ProfilesResolved { profiles } => Some(profiles),
        _ => None,
    })
    .await;
    assert_eq!(profiles[&author].metadata.name.as_deref(), Some("alice"));
    assert!(client.enricher().profile(&author).is_some());

    let (feed_id, emitted) = wait_for(&mut events, |event| match event {
        SyncEvent::FeedUpdated { feed_id, events } => Some((feed_id, events)),
        _ => None,
    })
    .await;
    assert_eq!(feed_id, "home");
    assert_eq!(emitted.len(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn test_resync_with_unchanged_relays_emits_nothing() {
    let sk = new_key();
    let relay = MockRelay::start().await;
    relay.seed([note(&sk, "a", 100), note(&sk, "b", 100), note(&sk, "c", 90)]);

    let client = connected_client(&[&relay]).await;
    let filter = Filter::new().kinds(vec![1]);

    let first = client.feeds().sync("home", &filter).await.unwrap();
    assert_eq!(first.len(), 3);
    let state = client.feeds().feeds().get("home").unwrap();
    let cursor = state.lock().await.latest_seen();
    assert_eq!(cursor, Some(100));

    let second = client.feeds().sync("home", &filter).await.unwrap();
    assert!(second.is_empty());

    let guard = state.lock().await;
    assert_eq!(guard.latest_seen(), cursor);
    assert_eq!(guard.known_ids().len(), 3);
    drop(guard);

    // The second request carries the cursor
    let filters = relay.filters();
    assert_eq!(filters.last().and_then(|f| f.since), Some(100));

    client.shutdown().await;
}

#[tokio::test]
async fn test_cursor_only_moves_forward() {
    let sk = new_key();
    let relay = MockRelay::start().await;
    relay.seed([note(&sk, "old", 100)]);

    let client = connected_client(&[&relay]).await;
    let filter = Filter::new().kinds(vec![1]);
    client.feeds().sync("home", &filter).await.unwrap();

    relay.seed([note(&sk, "newer", 300)]);
    let synced = client.feeds().sync("home", &filter).await.unwrap();
    assert_eq!(synced.len(), 1);

    let state = client.feeds().feeds().get("home").unwrap();
    let guard = state.lock().await;
    assert_eq!(guard.latest_seen(), Some(300));
    assert_eq!(guard.known_ids().len(), 2);
    drop(guard);

    client.shutdown().await;
}

#[tokio::test]
async fn test_embedded_repost_needs_no_fetch() {
    let original_author = new_key();
    let reposter = new_key();
    let original = note(&original_author, "worth sharing", 100);
    let boosted = repost(&reposter, &original, 200);

    let relay = MockRelay::start().await;
    relay.seed([boosted.clone()]);

    let client = connected_client(&[&relay]).await;
    let synced = client
        .feeds()
        .sync("home", &Filter::new().kinds(vec![6]))
        .await
        .unwrap();

    assert!(synced.iter().any(|e| e.id == original.id));
    assert!(synced.iter().any(|e| e.id == boosted.id));
    let fetched_original = relay
        .filters()
        .iter()
        .any(|f| f.ids.as_ref().is_some_and(|ids| ids.contains(&original.id)));
    assert!(!fetched_original);

    client.shutdown().await;
}

#[tokio::test]
async fn test_bare_repost_fetches_the_original() {
    let original_author = new_key();
    let reposter = new_key();
    let original = note(&original_author, "worth sharing", 100);
    let mut template = repost_template(&original, None).at(200);
    template.content = String::new();
    let boosted = SchnorrCodec.sign(&template, &reposter).unwrap();

    let relay = MockRelay::start().await;
    relay.seed([boosted, original.clone(), profile(&original_author, "bob", 10)]);

    let client = connected_client(&[&relay]).await;
    let synced = client
        .feeds()
        .sync("home", &Filter::new().kinds(vec![6]))
        .await
        .unwrap();

    assert!(synced.iter().any(|e| e.id == original.id));
    assert!(
        relay
            .filters()
            .iter()
            .any(|f| f.ids.as_ref().is_some_and(|ids| ids.contains(&original.id)))
    );
    let original_pubkey = public_key_hex(&original_author).unwrap();
    assert!(client.enricher().profile(&original_pubkey).is_some());

    client.shutdown().await;
}

#[tokio::test]
async fn test_sync_indexes_reactions_to_feed_events() {
    let sk = new_key();
    let fan = new_key();
    let target = note(&sk, "react to me", 100);
    let reaction = SchnorrCodec
        .sign(&reaction_template(&target, "+").at(150), &fan)
        .unwrap();

    let relay = MockRelay::start().await;
    relay.seed([target.clone(), reaction]);

    let client = connected_client(&[&relay]).await;
    client
        .feeds()
        .sync("home", &Filter::new().kinds(vec![1]))
        .await
        .unwrap();

    assert_eq!(client.reactions().count(&target.id), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn test_sync_without_relays_fails_fast() {
    let client = SyncClient::new(test_config(vec![]));
    let result = client.feeds().sync("home", &Filter::new()).await;
    assert!(matches!(result, Err(ClientError::NoUsableRelays)));
}
