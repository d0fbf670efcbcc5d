//! Facade wiring the engine together from one [`SyncConfig`].

use crate::config::SyncConfig;
use crate::enrich::Enricher;
use crate::feed::{FeedRegistry, FeedSyncEngine};
use crate::live::LiveSubscriptionManager;
use crate::message::Filter;
use crate::notify::{Notifier, SyncEvent};
use crate::pool::RelayPool;
use crate::publish::Publisher;
use crate::query::QueryExecutor;
use crate::reactions::ReactionIndex;
use crate::relay::ConnectionState;
use nostr::{ContactList, Event, EventCodec, Kind, SchnorrCodec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// A relay pool plus every component that works on it.
///
/// All components share one codec, one notifier, one feed registry, and one
/// reaction index.
pub struct SyncClient {
    config: SyncConfig,
    pool: Arc<RelayPool>,
    executor: QueryExecutor,
    enricher: Enricher,
    feeds: FeedSyncEngine,
    live: LiveSubscriptionManager,
    publisher: Publisher,
    reactions: ReactionIndex,
    notifier: Notifier,
}

impl SyncClient {
    /// Build a client with the Schnorr codec. Nothing connects until [`SyncClient::connect`].
    pub fn new(config: SyncConfig) -> Self {
        Self::with_codec(config, Arc::new(SchnorrCodec))
    }

    pub fn with_codec(config: SyncConfig, codec: Arc<dyn EventCodec>) -> Self {
        let notifier = Notifier::new(config.notification_capacity);
        let pool = Arc::new(RelayPool::with_config(&config, codec, notifier.clone()));
        let executor = QueryExecutor::from_config(&config);
        let reactions = ReactionIndex::new();
        let registry = FeedRegistry::new();
        let enricher = Enricher::new(
            Arc::clone(&pool),
            executor.clone(),
            reactions.clone(),
            &config,
        );

        Self {
            feeds: FeedSyncEngine::new(
                Arc::clone(&pool),
                executor.clone(),
                enricher.clone(),
                registry.clone(),
            ),
            live: LiveSubscriptionManager::new(
                Arc::clone(&pool),
                enricher.clone(),
                registry,
                reactions.clone(),
            ),
            publisher: Publisher::new(Arc::clone(&pool), &config),
            config,
            pool,
            executor,
            enricher,
            reactions,
            notifier,
        }
    }

    /// Connect every configured relay concurrently.
    pub async fn connect(&self) -> HashMap<String, ConnectionState> {
        self.pool.connect_all(&self.config.relays).await
    }

    /// Cancel live feeds and disconnect every relay.
    pub async fn shutdown(&self) {
        self.live.unsubscribe_all().await;
        self.pool.disconnect_all().await;
        debug!("Sync client shut down");
    }

    /// Receive engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.notifier.subscribe()
    }

    /// One-shot query against every usable relay.
    pub async fn query(&self, filter: &Filter) -> Vec<Event> {
        let relays = self.pool.usable_links().await;
        self.executor.run(filter, &relays).await
    }

    /// Latest contact list published by `pubkey`, if any relay has one.
    pub async fn contact_list(&self, pubkey: &str) -> Option<ContactList> {
        let filter = Filter::new()
            .authors(vec![pubkey.to_string()])
            .kinds(vec![Kind::ContactList.as_u16()])
            .limit(1);

        self.query(&filter)
            .await
            .into_iter()
            .max_by_key(|e| e.created_at)
            .and_then(|e| ContactList::from_event(&e).ok())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    pub fn feeds(&self) -> &FeedSyncEngine {
        &self.feeds
    }

    pub fn live(&self) -> &LiveSubscriptionManager {
        &self.live
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn reactions(&self) -> &ReactionIndex {
        &self.reactions
    }
}

/// Notes and reposts by everyone on the list, including its owner.
pub fn following_filter(contacts: &ContactList) -> Filter {
    let mut authors = contacts.pubkeys();
    if !authors.contains(&contacts.owner) {
        authors.push(contacts.owner.clone());
    }
    Filter::new()
        .authors(authors)
        .kinds(vec![Kind::Note.as_u16(), Kind::Repost.as_u16()])
}

/// Notes referencing the thread root through an "e" tag.
///
/// The root itself does not match, since `ids` and `#e` constraints must
/// both hold. Fetch it separately with `Filter::new().ids(..)`.
pub fn thread_filter(event_id: &str) -> Filter {
    Filter::new()
        .kinds(vec![Kind::Note.as_u16()])
        .event_refs(vec![event_id.to_string()])
}

/// Notes, reposts, and reactions that tag `pubkey`.
pub fn notifications_filter(pubkey: &str) -> Filter {
    Filter::new()
        .kinds(vec![
            Kind::Note.as_u16(),
            Kind::Repost.as_u16(),
            Kind::Reaction.as_u16(),
        ])
        .pubkey_refs(vec![pubkey.to_string()])
}
