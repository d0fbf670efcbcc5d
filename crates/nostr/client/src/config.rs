//! Sync engine configuration

use crate::DEFAULT_RELAYS;
use crate::error::{ClientError, Result};
use crate::relay::RelayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Sync engine configuration
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relays connected on startup
    pub relays: Vec<String>,
    /// Query limit when a filter sets none
    pub default_limit: usize,
    /// Per-relay connect timeout
    pub connect_timeout_secs: u64,
    /// Per-relay wait for EOSE on a single query
    pub query_timeout_secs: u64,
    /// Per-relay wait for OK after publishing
    pub publish_ack_timeout_secs: u64,
    /// Max ids or pubkeys per secondary fetch
    pub fanout_batch_size: usize,
    /// Limit on the reaction fetch of one enrichment pass
    pub reaction_limit: usize,
    /// Check id and signature of every received event
    pub verify_signatures: bool,
    /// Capacity of the notification broadcast channel
    pub notification_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            default_limit: 5,
            connect_timeout_secs: 10,
            query_timeout_secs: 10,
            publish_ack_timeout_secs: 10,
            fanout_batch_size: 100,
            reaction_limit: 500,
            verify_signatures: true,
            notification_capacity: 1024,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SyncConfig =
            toml::from_str(content).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Reject values that would stall or disable the engine.
    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 {
            return Err(ClientError::Config("default_limit must be positive".to_string()));
        }
        if self.fanout_batch_size == 0 {
            return Err(ClientError::Config(
                "fanout_batch_size must be positive".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 || self.query_timeout_secs == 0 {
            return Err(ClientError::Config("timeouts must be positive".to_string()));
        }
        for relay in &self.relays {
            let url = Url::parse(relay)?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(ClientError::InvalidUrl(relay.clone()));
            }
        }
        Ok(())
    }

    /// Set relays
    pub fn with_relays(mut self, relays: Vec<String>) -> Self {
        self.relays = relays;
        self
    }

    /// Set default query limit
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    /// Set connect and query timeouts
    pub fn with_timeouts(mut self, connect_secs: u64, query_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.query_timeout_secs = query_secs;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn publish_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_ack_timeout_secs)
    }

    /// Per-link settings derived from this config.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            connect_timeout: self.connect_timeout(),
            verify_signatures: self.verify_signatures,
        }
    }
}
