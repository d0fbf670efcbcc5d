//! Long-running per-feed subscriptions.
//!
//! `subscribe_feed` opens one subscription per usable relay with
//! `since = now`. A forwarding task per relay feeds a single processing task
//! for the feed, which drops repeats, resolves references for each new event,
//! and emits it. Reactions skip resolution and go straight to the
//! [`ReactionIndex`].

use crate::enrich::Enricher;
use crate::error::{ClientError, Result};
use crate::feed::{FeedRegistry, SharedFeedState};
use crate::message::Filter;
use crate::notify::Notifier;
use crate::pool::RelayPool;
use crate::reactions::ReactionIndex;
use nostr::{Event, Kind, unix_now};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tasks serving one live subscription of a feed.
struct LiveEntry {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
}

type LiveTasks = Arc<Mutex<HashMap<String, LiveEntry>>>;

/// Opens, holds, and cancels live feed subscriptions.
pub struct LiveSubscriptionManager {
    pool: Arc<RelayPool>,
    enricher: Enricher,
    feeds: FeedRegistry,
    reactions: ReactionIndex,
    notifier: Notifier,
    /// feed_id -> forwarding tasks and the processing task
    tasks: LiveTasks,
    generation: AtomicU64,
}

impl LiveSubscriptionManager {
    pub fn new(
        pool: Arc<RelayPool>,
        enricher: Enricher,
        feeds: FeedRegistry,
        reactions: ReactionIndex,
    ) -> Self {
        let notifier = pool.notifier().clone();
        Self {
            pool,
            enricher,
            feeds,
            reactions,
            notifier,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Subscribe `feed_id` to live events matching `filter` on every usable relay.
    ///
    /// Replaces an existing live subscription for the same feed. Returns the
    /// number of relays subscribed.
    pub async fn subscribe_feed(&self, feed_id: &str, filter: &Filter) -> Result<usize> {
        let relays = self.pool.usable_links().await;
        if relays.is_empty() {
            return Err(ClientError::NoUsableRelays);
        }
        self.unsubscribe_feed(feed_id).await;

        let filter = filter.clone().since(unix_now());
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let mut handles = Vec::new();
        let mut tasks = Vec::new();

        for link in &relays {
            let mut subscription = match link.subscribe(filter.clone()) {
                Ok(subscription) => subscription,
                Err(e) => {
                    warn!("Could not subscribe feed {} on {}: {}", feed_id, link.url(), e);
                    continue;
                }
            };
            handles.push(subscription.handle());

            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = subscription.next_event().await {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        if handles.is_empty() {
            return Err(ClientError::NoUsableRelays);
        }

        let subscribed = handles.len();
        let state = self.feeds.entry(feed_id);
        state.lock().await.attach(handles);

        // Registered before the processor starts so its exit can find it
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.tasks
            .lock()
            .insert(feed_id.to_string(), LiveEntry { generation, tasks });

        let processor = LiveProcessor {
            feed_id: feed_id.to_string(),
            generation,
            live: self.tasks.clone(),
            state,
            enricher: self.enricher.clone(),
            reactions: self.reactions.clone(),
            notifier: self.notifier.clone(),
        };
        let handle = tokio::spawn(processor.run(rx));
        if let Some(entry) = self.tasks.lock().get_mut(feed_id)
            && entry.generation == generation
        {
            entry.tasks.push(handle);
        }

        info!("Feed {} is live on {} relays", feed_id, subscribed);
        Ok(subscribed)
    }

    /// Close every relay subscription of `feed_id` and drop its dedup map.
    ///
    /// Calling it again, or for a feed that never went live, does nothing.
    pub async fn unsubscribe_feed(&self, feed_id: &str) {
        let entry = self.tasks.lock().remove(feed_id);

        let cancelled = match self.feeds.get(feed_id) {
            Some(state) => state.lock().await.cancel_subscriptions(),
            None => 0,
        };

        if let Some(entry) = entry {
            for task in entry.tasks {
                task.abort();
            }
            debug!("Feed {} unsubscribed ({} relay subscriptions)", feed_id, cancelled);
        }
    }

    pub fn is_live(&self, feed_id: &str) -> bool {
        self.tasks.lock().contains_key(feed_id)
    }

    pub fn live_feeds(&self) -> Vec<String> {
        self.tasks.lock().keys().cloned().collect()
    }

    /// Unsubscribe every live feed.
    pub async fn unsubscribe_all(&self) {
        for feed_id in self.live_feeds() {
            self.unsubscribe_feed(&feed_id).await;
        }
    }
}

struct LiveProcessor {
    feed_id: String,
    generation: u64,
    live: LiveTasks,
    state: SharedFeedState,
    enricher: Enricher,
    reactions: ReactionIndex,
    notifier: Notifier,
}

impl LiveProcessor {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Event>) {
        // Scoped to this subscription; discarded with the task.
        let mut processed: HashSet<String> = HashSet::new();

        while let Some(event) = rx.recv().await {
            if !processed.insert(event.id.clone()) {
                continue;
            }

            if event.kind_type() == Kind::Reaction {
                let added = self.reactions.merge([event]);
                if !added.is_empty() {
                    self.notifier.reactions_updated(added);
                }
                continue;
            }

            self.process(event).await;
        }

        // Every relay stream ended, e.g. the feed was closed
        let mut live = self.live.lock();
        if live
            .get(&self.feed_id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            live.remove(&self.feed_id);
        }
        debug!("Live processing for feed {} ended", self.feed_id);
    }

    async fn process(&self, event: Event) {
        // Held across enrichment so a concurrent sync of the same feed waits.
        let mut state = self.state.lock().await;
        if state.contains(&event.id) {
            return;
        }

        let created_at = event.created_at;
        let enrichment = self.enricher.enrich(std::slice::from_ref(&event)).await;

        state.advance(created_at);
        let merged = state.absorb(enrichment.events);
        drop(state);

        if !merged.is_empty() {
            self.notifier.feed_updated(&self.feed_id, merged);
        }
    }
}
