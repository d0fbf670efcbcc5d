//! Notifications for the application state container.
//!
//! The engine never calls back into the application. Everything it wants the
//! outside world to know about is broadcast as a [`SyncEvent`]; the
//! application holds a receiver from [`Notifier::subscribe`].

use crate::publish::PublishReport;
use crate::relay::ConnectionState;
use nostr::{Event, Profile};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Events emitted by the sync engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A feed received newly enriched events (primary, reposted, and referenced)
    FeedUpdated { feed_id: String, events: Vec<Event> },
    /// Profiles resolved in one enrichment pass, keyed by pubkey
    ProfilesResolved { profiles: HashMap<String, Profile> },
    /// Reactions newly indexed, keyed by target event id
    ReactionsUpdated { reactions: HashMap<String, Vec<Event>> },
    /// A relay changed connection state
    RelayStateChanged { url: String, state: ConnectionState },
    /// Every relay answered (or timed out) for a published event
    PublishResult(PublishReport),
}

/// Broadcast side of the notification channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SyncEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Having no subscribers is fine.
    pub fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("No subscribers for sync event");
        }
    }

    pub fn feed_updated(&self, feed_id: &str, events: Vec<Event>) {
        self.emit(SyncEvent::FeedUpdated {
            feed_id: feed_id.to_string(),
            events,
        });
    }

    pub fn profiles_resolved(&self, profiles: HashMap<String, Profile>) {
        self.emit(SyncEvent::ProfilesResolved { profiles });
    }

    pub fn reactions_updated(&self, reactions: HashMap<String, Vec<Event>>) {
        self.emit(SyncEvent::ReactionsUpdated { reactions });
    }

    pub fn relay_state_changed(&self, url: &str, state: ConnectionState) {
        self.emit(SyncEvent::RelayStateChanged {
            url: url.to_string(),
            state,
        });
    }

    pub fn publish_result(&self, report: PublishReport) {
        self.emit(SyncEvent::PublishResult(report));
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(1024)
    }
}
