//! Relay pool and event sync engine.
//!
//! This crate provides:
//! - WebSocket links to Nostr relays (NIP-01 relay protocol)
//! - A relay pool with per-relay connection state
//! - Bounded, deduplicated queries across every connected relay
//! - Incremental feed sync with `since` cursors and reference resolution
//!   (profiles, reposts, mentions, reactions)
//! - Live per-feed subscriptions with cancellation
//! - Event publication with per-relay acknowledgements
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_sync::{SyncClient, SyncConfig, SyncEvent, following_filter};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = SyncClient::new(SyncConfig::default());
//!     let mut events = client.subscribe();
//!
//!     client.connect().await;
//!
//!     if let Some(contacts) = client.contact_list(&"ab".repeat(32)).await {
//!         let filter = following_filter(&contacts);
//!         client.feeds().sync("following", &filter).await.ok();
//!         client.live().subscribe_feed("following", &filter).await.ok();
//!     }
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SyncEvent::FeedUpdated { feed_id, events } = event {
//!             println!("{}: {} new events", feed_id, events.len());
//!         }
//!     }
//! }
//! ```

mod client;
mod config;
mod enrich;
mod error;
mod feed;
mod live;
mod message;
mod notify;
mod pool;
mod publish;
mod query;
mod reactions;
mod relay;
mod subscription;

// Re-export main types
pub use client::{SyncClient, following_filter, notifications_filter, thread_filter};
pub use config::SyncConfig;
pub use enrich::{Enricher, Enrichment};
pub use error::{ClientError, Result};
pub use feed::{FeedRegistry, FeedState, FeedSyncEngine, SharedFeedState};
pub use live::LiveSubscriptionManager;
pub use message::{ClientMessage, Filter, MessageError, RelayMessage};
pub use notify::{Notifier, SyncEvent};
pub use pool::RelayPool;
pub use publish::{PublishReport, Publisher, RelayAck};
pub use query::QueryExecutor;
pub use reactions::ReactionIndex;
pub use relay::{Ack, AckWaiter, ConnectionState, RelayConfig, RelayLink};
pub use subscription::{RelayStream, Subscription, SubscriptionHandle, generate_subscription_id};

/// Default relays.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];
