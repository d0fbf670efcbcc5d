//! One-shot bounded queries across many relays.

use crate::config::SyncConfig;
use crate::message::Filter;
use crate::relay::RelayLink;
use nostr::Event;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Runs a filter against a set of relays and merges the distinct results.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    default_limit: usize,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(default_limit: usize, query_timeout: Duration) -> Self {
        Self {
            default_limit,
            query_timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.default_limit, config.query_timeout())
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Distinct events in arrival order.
    ///
    /// Resolves as soon as `limit` distinct events arrived (the filter's own
    /// limit, else the default), or once every relay has sent EOSE, failed,
    /// or hit the per-relay timeout. Outstanding relay queries are closed on
    /// return. An empty relay set resolves immediately with nothing.
    pub async fn run(&self, filter: &Filter, relays: &[RelayLink]) -> Vec<Event> {
        let limit = filter.limit.map_or(self.default_limit, |l| l as usize);
        let filter = filter.clone().limit(limit as u64);
        self.collect(&filter, relays, limit, |event| event.id.as_str()).await
    }

    /// Distinct events in arrival order, stopping once `wanted` distinct
    /// keys have been seen rather than `wanted` events.
    ///
    /// Used for replaceable kinds, where several versions of one author's
    /// event may arrive and only the number of authors covered matters. The
    /// filter is sent as given.
    pub async fn run_until_keys<K>(
        &self,
        filter: &Filter,
        relays: &[RelayLink],
        wanted: usize,
        key: K,
    ) -> Vec<Event>
    where
        K: Fn(&Event) -> &str,
    {
        self.collect(filter, relays, wanted, key).await
    }

    async fn collect<K>(
        &self,
        filter: &Filter,
        relays: &[RelayLink],
        wanted: usize,
        key: K,
    ) -> Vec<Event>
    where
        K: Fn(&Event) -> &str,
    {
        if relays.is_empty() || wanted == 0 {
            return Vec::new();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut tasks = Vec::with_capacity(relays.len());

        for link in relays {
            let link = link.clone();
            let filter = filter.clone();
            let tx = tx.clone();
            let query_timeout = self.query_timeout;

            tasks.push(tokio::spawn(async move {
                let mut stream = match link.query(filter) {
                    Ok(stream) => stream,
                    Err(e) => {
                        debug!("Relay {} exhausted before query: {}", link.url(), e);
                        return;
                    }
                };

                let drain = async {
                    while let Some(event) = stream.next_event().await {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                };
                if timeout(query_timeout, drain).await.is_err() {
                    debug!(
                        "Query {} on {} timed out after {:?}",
                        stream.subscription_id(),
                        link.url(),
                        query_timeout
                    );
                }
            }));
        }
        drop(tx);

        let mut seen = HashSet::new();
        let mut keys = HashSet::new();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if !seen.insert(event.id.clone()) {
                continue;
            }
            keys.insert(key(&event).to_string());
            events.push(event);
            if keys.len() >= wanted {
                break;
            }
        }

        // Dropping the streams sends CLOSE to relays still answering
        for task in tasks {
            task.abort();
        }
        debug!(
            "Query across {} relays returned {} events",
            relays.len(),
            events.len()
        );
        events
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
