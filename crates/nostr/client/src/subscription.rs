//! Per-subscription channels handed out by a [`RelayLink`].
//!
//! Each REQ sent to a relay gets its own channel, routed by subscription id.
//! A [`RelayStream`] ends at EOSE and is used for one-shot queries; a
//! [`Subscription`] stays open for live events until cancelled. Both send
//! CLOSE to the relay when they go away.

use crate::relay::RelayLink;
use nostr::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// What the reader task routes to a subscription channel.
#[derive(Debug, Clone)]
pub(crate) enum StreamItem {
    Event(Event),
    Eose,
    Closed(String),
}

pub(crate) type StreamSender = mpsc::UnboundedSender<StreamItem>;
pub(crate) type StreamReceiver = mpsc::UnboundedReceiver<StreamItem>;

/// Stored events for one query against one relay.
///
/// Yields events until the relay signals EOSE, closes the subscription, or
/// the link fails. A failed link simply ends the stream.
pub struct RelayStream {
    link: RelayLink,
    subscription_id: String,
    rx: StreamReceiver,
    finished: bool,
}

impl RelayStream {
    pub(crate) fn new(link: RelayLink, subscription_id: String, rx: StreamReceiver) -> Self {
        Self {
            link,
            subscription_id,
            rx,
            finished: false,
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn relay_url(&self) -> &str {
        self.link.url()
    }

    /// Next stored event, or `None` once the relay is exhausted.
    pub async fn next_event(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }

        match self.rx.recv().await {
            Some(StreamItem::Event(event)) => Some(event),
            Some(StreamItem::Eose) => {
                self.finished = true;
                None
            }
            Some(StreamItem::Closed(reason)) => {
                debug!(
                    "Relay {} closed query {}: {}",
                    self.link.url(),
                    self.subscription_id,
                    reason
                );
                self.finished = true;
                None
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        self.link.release(&self.subscription_id);
    }
}

/// Cancellation handle for a live [`Subscription`].
///
/// Clones share the cancelled flag, so cancelling twice is a no-op.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    link: RelayLink,
    subscription_id: Arc<str>,
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn relay_url(&self) -> &str {
        self.link.url()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stop the subscription: drop its route and send CLOSE if still connected.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!(
                "Cancelling subscription {} on {}",
                self.subscription_id,
                self.link.url()
            );
            self.link.release(&self.subscription_id);
        }
    }
}

/// Live events for one subscription against one relay.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: StreamReceiver,
}

impl Subscription {
    pub(crate) fn new(link: RelayLink, subscription_id: String, rx: StreamReceiver) -> Self {
        Self {
            handle: SubscriptionHandle {
                link,
                subscription_id: subscription_id.into(),
                cancelled: Arc::new(AtomicBool::new(false)),
            },
            rx,
        }
    }

    /// A handle that can cancel this subscription from elsewhere.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn relay_url(&self) -> &str {
        self.handle.relay_url()
    }

    /// Next live event. EOSE is skipped; `None` once cancelled, closed by
    /// the relay, or the link failed.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await? {
                StreamItem::Event(event) => return Some(event),
                StreamItem::Eose => continue,
                StreamItem::Closed(reason) => {
                    debug!(
                        "Relay {} closed subscription {}: {}",
                        self.handle.relay_url(),
                        self.handle.subscription_id,
                        reason
                    );
                    return None;
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
