//! Incremental per-feed synchronization.
//!
//! A feed is a named view over the event log ("following", "notifications",
//! a thread root id). Each feed keeps the ids it has delivered and a `since`
//! cursor so repeated syncs only ask relays for what is new. All mutation of
//! a feed's state happens under that feed's lock, so two sync cycles for the
//! same feed never overlap.

use crate::enrich::Enricher;
use crate::error::{ClientError, Result};
use crate::message::Filter;
use crate::notify::Notifier;
use crate::pool::RelayPool;
use crate::query::QueryExecutor;
use crate::subscription::SubscriptionHandle;
use nostr::{Event, sort_events};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// State of one feed.
#[derive(Debug, Default)]
pub struct FeedState {
    known_ids: HashSet<String>,
    latest_seen: Option<u64>,
    active_subscriptions: Vec<SubscriptionHandle>,
}

impl FeedState {
    pub fn known_ids(&self) -> &HashSet<String> {
        &self.known_ids
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.known_ids.contains(event_id)
    }

    /// Highest `created_at` among primary events delivered to this feed.
    pub fn latest_seen(&self) -> Option<u64> {
        self.latest_seen
    }

    pub fn active_subscription_count(&self) -> usize {
        self.active_subscriptions.len()
    }

    /// Record delivered events. Returns those not delivered before, in order.
    pub(crate) fn absorb(&mut self, events: Vec<Event>) -> Vec<Event> {
        events
            .into_iter()
            .filter(|event| self.known_ids.insert(event.id.clone()))
            .collect()
    }

    /// Move the cursor forward; it never goes back.
    pub(crate) fn advance(&mut self, created_at: u64) {
        self.latest_seen = Some(self.latest_seen.map_or(created_at, |c| c.max(created_at)));
    }

    pub(crate) fn attach(&mut self, handles: Vec<SubscriptionHandle>) {
        self.active_subscriptions.extend(handles);
    }

    /// Cancel and forget every live subscription of this feed.
    pub(crate) fn cancel_subscriptions(&mut self) -> usize {
        let handles = std::mem::take(&mut self.active_subscriptions);
        for handle in &handles {
            handle.cancel();
        }
        handles.len()
    }
}

pub type SharedFeedState = Arc<Mutex<FeedState>>;

/// Registry of feed states, shared by the sync engine and live subscriptions.
#[derive(Debug, Clone, Default)]
pub struct FeedRegistry {
    feeds: Arc<parking_lot::Mutex<HashMap<String, SharedFeedState>>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `feed_id`, created empty on first use.
    pub fn entry(&self, feed_id: &str) -> SharedFeedState {
        Arc::clone(self.feeds.lock().entry(feed_id.to_string()).or_default())
    }

    pub fn get(&self, feed_id: &str) -> Option<SharedFeedState> {
        self.feeds.lock().get(feed_id).cloned()
    }

    pub fn remove(&self, feed_id: &str) -> Option<SharedFeedState> {
        self.feeds.lock().remove(feed_id)
    }

    pub fn feed_ids(&self) -> Vec<String> {
        self.feeds.lock().keys().cloned().collect()
    }
}

/// One-shot feed population with `since` cursoring.
pub struct FeedSyncEngine {
    pool: Arc<RelayPool>,
    executor: QueryExecutor,
    enricher: Enricher,
    feeds: FeedRegistry,
    notifier: Notifier,
}

impl FeedSyncEngine {
    pub fn new(
        pool: Arc<RelayPool>,
        executor: QueryExecutor,
        enricher: Enricher,
        feeds: FeedRegistry,
    ) -> Self {
        let notifier = pool.notifier().clone();
        Self {
            pool,
            executor,
            enricher,
            feeds,
            notifier,
        }
    }

    pub fn feeds(&self) -> &FeedRegistry {
        &self.feeds
    }

    /// Fetch what is new for `feed_id`, resolve its references, and emit it.
    ///
    /// Returns the merged events newly delivered to the feed, newest first.
    /// An unchanged relay data set yields an empty result and no
    /// notification. Zero connected relays is an error.
    pub async fn sync(&self, feed_id: &str, filter: &Filter) -> Result<Vec<Event>> {
        let relays = self.pool.usable_links().await;
        if relays.is_empty() {
            return Err(ClientError::NoUsableRelays);
        }

        let state = self.feeds.entry(feed_id);
        let mut state = state.lock().await;

        let mut filter = filter.clone();
        if let Some(cursor) = state.latest_seen() {
            filter.since = Some(filter.since.map_or(cursor, |s| s.max(cursor)));
        }

        let fetched = self.executor.run(&filter, &relays).await;
        let primary: Vec<Event> = fetched
            .into_iter()
            .filter(|event| !state.contains(&event.id))
            .collect();
        if primary.is_empty() {
            debug!("Feed {} is up to date", feed_id);
            return Ok(Vec::new());
        }

        let enrichment = self.enricher.enrich(&primary).await;

        // Secondary fetches never move the cursor.
        if let Some(newest) = primary.iter().map(|e| e.created_at).max() {
            state.advance(newest);
        }
        let mut merged = state.absorb(enrichment.events);
        sort_events(&mut merged);

        info!(
            "Feed {} synced {} new events ({} primary)",
            feed_id,
            merged.len(),
            primary.len()
        );
        self.notifier.feed_updated(feed_id, merged.clone());
        Ok(merged)
    }

    /// Drop a feed's state and cancel its live subscriptions.
    ///
    /// Returns false if the feed did not exist.
    pub async fn close_feed(&self, feed_id: &str) -> bool {
        match self.feeds.remove(feed_id) {
            Some(state) => {
                let cancelled = state.lock().await.cancel_subscriptions();
                debug!("Closed feed {} ({} subscriptions)", feed_id, cancelled);
                true
            }
            None => false,
        }
    }
}
