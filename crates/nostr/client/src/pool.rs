//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool owns every [`RelayLink`] and is the only place connection state
//! is tracked. Components that talk to relays ask it for the currently
//! usable links and never hold on to membership themselves.

use crate::config::SyncConfig;
use crate::error::{ClientError, Result};
use crate::notify::Notifier;
use crate::relay::{ConnectionState, RelayConfig, RelayLink};
use futures::future::join_all;
use nostr::EventCodec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A pool of Nostr relay connections.
pub struct RelayPool {
    /// Links indexed by URL
    links: Arc<RwLock<HashMap<String, RelayLink>>>,
    relay_config: RelayConfig,
    codec: Arc<dyn EventCodec>,
    notifier: Notifier,
}

impl RelayPool {
    /// Create an empty pool with default link settings.
    pub fn new(codec: Arc<dyn EventCodec>, notifier: Notifier) -> Self {
        Self::with_relay_config(RelayConfig::default(), codec, notifier)
    }

    /// Create an empty pool using the link settings of `config`.
    pub fn with_config(config: &SyncConfig, codec: Arc<dyn EventCodec>, notifier: Notifier) -> Self {
        Self::with_relay_config(config.relay_config(), codec, notifier)
    }

    pub fn with_relay_config(
        relay_config: RelayConfig,
        codec: Arc<dyn EventCodec>,
        notifier: Notifier,
    ) -> Self {
        Self {
            links: Arc::new(RwLock::new(HashMap::new())),
            relay_config,
            codec,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn codec(&self) -> Arc<dyn EventCodec> {
        Arc::clone(&self.codec)
    }

    /// Add a relay and connect to it, bounded by the connect timeout.
    ///
    /// Returns the resulting state; a relay that fails to connect stays in the
    /// pool as `Failed`. Adding a relay that is already a member reconnects it
    /// only if it is not connected.
    pub async fn add(&self, url: &str) -> Result<ConnectionState> {
        let link = {
            let mut links = self.links.write().await;
            match links.get(url) {
                Some(link) => link.clone(),
                None => {
                    let link = RelayLink::new(
                        url,
                        self.relay_config.clone(),
                        Arc::clone(&self.codec),
                        self.notifier.clone(),
                    )?;
                    info!("Adding relay to pool: {}", url);
                    links.insert(url.to_string(), link.clone());
                    link
                }
            }
        };

        if let Err(e) = link.connect().await {
            debug!("Relay {} unavailable: {}", url, e);
        }
        Ok(link.state())
    }

    /// Add and connect many relays concurrently.
    ///
    /// Invalid URLs are logged and skipped; they never block the others.
    pub async fn connect_all(&self, urls: &[String]) -> HashMap<String, ConnectionState> {
        let attempts = urls.iter().map(|url| async move {
            match self.add(url).await {
                Ok(state) => Some((url.clone(), state)),
                Err(e) => {
                    warn!("Skipping relay {}: {}", url, e);
                    None
                }
            }
        });

        join_all(attempts).await.into_iter().flatten().collect()
    }

    /// Remove a relay from the pool, force-closing everything pending on it.
    pub async fn remove(&self, url: &str) -> Result<()> {
        let link = self.links.write().await.remove(url);
        let link = link.ok_or_else(|| ClientError::UnknownRelay(url.to_string()))?;

        info!("Removing relay from pool: {}", url);
        link.close().await;
        Ok(())
    }

    /// Connected relays are closed; anything else is (re)connected.
    pub async fn toggle(&self, url: &str) -> Result<ConnectionState> {
        let link = self
            .link(url)
            .await
            .ok_or_else(|| ClientError::UnknownRelay(url.to_string()))?;

        if link.is_connected() {
            link.close().await;
        } else if let Err(e) = link.connect().await {
            debug!("Relay {} unavailable: {}", url, e);
        }
        Ok(link.state())
    }

    /// Close then reconnect every member, all concurrently.
    pub async fn cycle_all(&self) -> HashMap<String, ConnectionState> {
        let links = self.links().await;
        info!("Cycling {} relays", links.len());

        let cycles = links.into_iter().map(|link| async move {
            link.close().await;
            if let Err(e) = link.connect().await {
                debug!("Relay {} unavailable after cycle: {}", link.url(), e);
            }
            (link.url().to_string(), link.state())
        });

        join_all(cycles).await.into_iter().collect()
    }

    /// Links that are currently connected.
    pub async fn usable_links(&self) -> Vec<RelayLink> {
        self.links
            .read()
            .await
            .values()
            .filter(|link| link.is_connected())
            .cloned()
            .collect()
    }

    /// Every member, whatever its state.
    pub async fn links(&self) -> Vec<RelayLink> {
        self.links.read().await.values().cloned().collect()
    }

    pub async fn link(&self, url: &str) -> Option<RelayLink> {
        self.links.read().await.get(url).cloned()
    }

    /// Get all relay URLs in the pool.
    pub async fn relay_urls(&self) -> Vec<String> {
        self.links.read().await.keys().cloned().collect()
    }

    /// Get connection states for all relays.
    pub async fn states(&self) -> HashMap<String, ConnectionState> {
        self.links
            .read()
            .await
            .iter()
            .map(|(url, link)| (url.clone(), link.state()))
            .collect()
    }

    /// Check if a relay is connected.
    pub async fn is_connected(&self, url: &str) -> bool {
        self.link(url).await.is_some_and(|link| link.is_connected())
    }

    /// Get number of connected relays.
    pub async fn connected_count(&self) -> usize {
        self.usable_links().await.len()
    }

    /// Disconnect from all relays, keeping them as members.
    pub async fn disconnect_all(&self) {
        let links = self.links().await;
        join_all(links.iter().map(|link| link.close())).await;
    }
}
