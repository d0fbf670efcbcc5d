//! Outbound publication.
//!
//! Events are signed once and sent to every usable relay in parallel. Each
//! relay's OK is collected independently; a slow relay only delays the
//! report, never the caller of [`Publisher::publish`].

use crate::config::SyncConfig;
use crate::error::{ClientError, Result};
use crate::notify::Notifier;
use crate::pool::RelayPool;
use crate::relay::{Ack, AckWaiter, RelayLink};
use futures::future::join_all;
use nostr::{Event, EventCodec, EventTemplate, Kind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One relay's answer to a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAck {
    pub url: String,
    pub ack: Ack,
}

/// Per-relay outcome of publishing one event.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub event: Event,
    pub acks: Vec<RelayAck>,
}

impl PublishReport {
    /// Relays that accepted or already had the event.
    pub fn accepted(&self) -> usize {
        self.acks.iter().filter(|a| a.ack.is_success()).count()
    }

    /// True when no relay accepted the event.
    pub fn all_rejected(&self) -> bool {
        self.accepted() == 0
    }

    /// (url, reason) for every refusal.
    pub fn rejections(&self) -> Vec<(String, String)> {
        self.acks
            .iter()
            .filter_map(|a| match &a.ack {
                Ack::Rejected(reason) => Some((a.url.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }
}

type PendingAcks = Vec<(String, AckWaiter)>;

/// Builds, signs, and broadcasts events.
pub struct Publisher {
    pool: Arc<RelayPool>,
    codec: Arc<dyn EventCodec>,
    notifier: Notifier,
    ack_timeout: Duration,
}

impl Publisher {
    pub fn new(pool: Arc<RelayPool>, config: &SyncConfig) -> Self {
        Self {
            codec: pool.codec(),
            notifier: pool.notifier().clone(),
            pool,
            ack_timeout: config.publish_ack_timeout(),
        }
    }

    /// Sign and broadcast a new event without waiting for relay answers.
    ///
    /// Returns once the event is queued on at least one relay. Answers are
    /// collected in the background, rejections are logged per relay, and the
    /// outcome is emitted as a publish result notification.
    pub async fn publish(
        &self,
        secret_key: &[u8; 32],
        kind: Kind,
        content: &str,
        tags: Vec<Vec<String>>,
    ) -> Result<Event> {
        let relays = self.usable_relays().await?;
        let event = self.sign(secret_key, kind, content, tags)?;
        let pending = self.dispatch(&event, &relays)?;

        let notifier = self.notifier.clone();
        let ack_timeout = self.ack_timeout;
        let background = event.clone();
        tokio::spawn(async move {
            let report = collect_acks(background, pending, ack_timeout).await;
            notifier.publish_result(report);
        });

        Ok(event)
    }

    /// Sign, broadcast, and wait for every relay's answer.
    ///
    /// Fails with `PublishFailed` when every usable relay rejected the event
    /// or never answered.
    pub async fn publish_and_confirm(
        &self,
        secret_key: &[u8; 32],
        kind: Kind,
        content: &str,
        tags: Vec<Vec<String>>,
    ) -> Result<PublishReport> {
        let relays = self.usable_relays().await?;
        let event = self.sign(secret_key, kind, content, tags)?;
        self.confirm(event, &relays).await
    }

    /// Broadcast an already-signed event and wait for every relay's answer.
    pub async fn publish_event(&self, event: Event) -> Result<PublishReport> {
        let relays = self.usable_relays().await?;
        self.codec
            .verify(&event)
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        self.confirm(event, &relays).await
    }

    async fn confirm(&self, event: Event, relays: &[RelayLink]) -> Result<PublishReport> {
        let pending = self.dispatch(&event, relays)?;
        let report = collect_acks(event, pending, self.ack_timeout).await;
        self.notifier.publish_result(report.clone());

        if report.all_rejected() {
            return Err(ClientError::PublishFailed {
                event_id: report.event.id.clone(),
                rejections: report.rejections(),
            });
        }
        Ok(report)
    }

    async fn usable_relays(&self) -> Result<Vec<RelayLink>> {
        let relays = self.pool.usable_links().await;
        if relays.is_empty() {
            return Err(ClientError::NoUsableRelays);
        }
        Ok(relays)
    }

    fn sign(
        &self,
        secret_key: &[u8; 32],
        kind: Kind,
        content: &str,
        tags: Vec<Vec<String>>,
    ) -> Result<Event> {
        let template = EventTemplate::new(kind, content).with_tags(tags);
        Ok(self.codec.sign(&template, secret_key)?)
    }

    /// Queue the event on every relay; at least one must take it.
    fn dispatch(&self, event: &Event, relays: &[RelayLink]) -> Result<PendingAcks> {
        let pending: PendingAcks = relays
            .iter()
            .filter_map(|link| match link.publish(event) {
                Ok(rx) => Some((link.url().to_string(), rx)),
                Err(e) => {
                    warn!("Could not send {} to {}: {}", event.id, link.url(), e);
                    None
                }
            })
            .collect();

        if pending.is_empty() {
            return Err(ClientError::NoUsableRelays);
        }
        info!("Published {} to {} relays", event.id, pending.len());
        Ok(pending)
    }
}

/// Wait for every relay's answer. A waiter that times out is dropped, which
/// unregisters it from its link.
async fn collect_acks(event: Event, pending: PendingAcks, ack_timeout: Duration) -> PublishReport {
    let pending = pending
        .into_iter()
        .map(|(url, waiter)| (url, waiter.recv()));
    await_acks(event, pending, ack_timeout).await
}

async fn await_acks<W>(
    event: Event,
    pending: impl IntoIterator<Item = (String, W)>,
    ack_timeout: Duration,
) -> PublishReport
where
    W: Future<Output = std::result::Result<Ack, oneshot::error::RecvError>>,
{
    let acks = join_all(pending.into_iter().map(|(url, rx)| {
        let event_id = event.id.clone();
        async move {
            let ack = match timeout(ack_timeout, rx).await {
                Ok(Ok(ack)) => ack,
                Ok(Err(_)) => Ack::Rejected("connection lost before OK".to_string()),
                Err(_) => Ack::Rejected(format!("no OK within {:?}", ack_timeout)),
            };

            match &ack {
                Ack::Rejected(reason) => {
                    let rejected = ClientError::PublishRejected {
                        url: url.clone(),
                        reason: reason.clone(),
                    };
                    warn!("{} ({})", rejected, event_id);
                }
                _ => debug!("Relay {} stored {}", url, event_id),
            }
            RelayAck { url, ack }
        }
    }))
    .await;

    PublishReport { event, acks }
}
