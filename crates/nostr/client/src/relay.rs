//! Single relay connection management
//!
//! A [`RelayLink`] owns one websocket to one relay. The socket is split into a
//! writer task fed by an outbound channel and a reader task that routes
//! inbound frames to per-subscription channels and pending acknowledgements.
//! Any transport error moves the link to `Failed` and ends every outstanding
//! stream on it; callers treat that relay as exhausted.

use crate::error::{ClientError, Result};
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::notify::Notifier;
use crate::subscription::{
    RelayStream, StreamItem, StreamReceiver, StreamSender, Subscription, generate_subscription_id,
};
use futures::{SinkExt, StreamExt};
use nostr::{Event, EventCodec};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected, never tried or closed by us
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connect attempt or transport failed; `connect()` may retry
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Relay answer to a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// OK true
    Accepted,
    /// OK true, relay already had the event
    Seen,
    /// OK false, or no answer at all
    Rejected(String),
}

impl Ack {
    /// Interpret the fields of an `["OK", id, success, message]` frame.
    pub fn from_ok(success: bool, message: &str) -> Self {
        match (success, message.starts_with("duplicate:")) {
            (true, true) => Ack::Seen,
            (true, false) => Ack::Accepted,
            (false, _) => Ack::Rejected(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Ack::Rejected(_))
    }
}

/// Pending answer to one published event on one link.
///
/// [`AckWaiter::recv`] yields the relay's OK, or errors if the link closes
/// first.
/// Dropping the waiter unregisters it, so abandoned publishes leave nothing
/// behind on the link.
pub struct AckWaiter {
    event_id: String,
    rx: oneshot::Receiver<Ack>,
    link: Weak<LinkInner>,
}

impl AckWaiter {
    pub async fn recv(mut self) -> std::result::Result<Ack, oneshot::error::RecvError> {
        (&mut self.rx).await
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(inner) = self.link.upgrade() {
            inner.forget_closed_acks(&self.event_id);
        }
    }
}

/// Relay link configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Verify id and signature of every inbound event
    pub verify_signatures: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            verify_signatures: true,
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type AckSender = oneshot::Sender<Ack>;

struct Session {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct LinkInner {
    url: String,
    config: RelayConfig,
    codec: Arc<dyn EventCodec>,
    notifier: Notifier,
    state: RwLock<ConnectionState>,
    session: Mutex<Option<Session>>,
    /// subscription_id -> channel of the stream that issued the REQ
    routes: Mutex<HashMap<String, StreamSender>>,
    /// event_id -> waiting publishers, in publish order
    pending_acks: Mutex<HashMap<String, Vec<AckSender>>>,
    generation: AtomicU64,
    /// Serializes connect and close
    lifecycle: tokio::sync::Mutex<()>,
}

/// Connection to a single relay. Clones share the same connection.
#[derive(Clone)]
pub struct RelayLink {
    inner: Arc<LinkInner>,
}

impl fmt::Debug for RelayLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayLink")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}

impl RelayLink {
    /// Create a link (does not connect yet). Only ws:// and wss:// are accepted.
    pub fn new(
        url: &str,
        config: RelayConfig,
        codec: Arc<dyn EventCodec>,
        notifier: Notifier,
    ) -> Result<Self> {
        let parsed = Url::parse(url)?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                parsed.scheme()
            )));
        }

        Ok(Self {
            inner: Arc::new(LinkInner {
                url: url.to_string(),
                config,
                codec,
                notifier,
                state: RwLock::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                routes: Mutex::new(HashMap::new()),
                pending_acks: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Connect to the relay, bounded by the configured timeout.
    ///
    /// A no-op when already connected. On failure the link is left `Failed`.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        self.inner.set_state(ConnectionState::Connecting);
        info!("Connecting to relay: {}", self.url());

        match timeout(self.inner.config.connect_timeout, connect_async(self.url())).await {
            Ok(Ok((ws, _response))) => {
                self.inner.start_session(ws);
                info!("Connected to relay: {}", self.url());
                Ok(())
            }
            Ok(Err(e)) => {
                self.inner.set_state(ConnectionState::Failed);
                warn!("Failed to connect to {}: {}", self.url(), e);
                Err(ClientError::Connect {
                    url: self.url().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.inner.set_state(ConnectionState::Failed);
                warn!(
                    "Connection to {} timed out after {:?}",
                    self.url(),
                    self.inner.config.connect_timeout
                );
                Err(ClientError::Connect {
                    url: self.url().to_string(),
                    reason: format!("timed out after {:?}", self.inner.config.connect_timeout),
                })
            }
        }
    }

    /// Close the connection. Every stream on this link ends immediately.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.shutdown() {
            info!("Disconnected from relay: {}", self.url());
        }
    }

    /// Issue a one-shot query; the stream ends at EOSE.
    pub fn query(&self, filter: Filter) -> Result<RelayStream> {
        let (subscription_id, rx) = self.open(filter)?;
        Ok(RelayStream::new(self.clone(), subscription_id, rx))
    }

    /// Open a live subscription that stays open until cancelled.
    pub fn subscribe(&self, filter: Filter) -> Result<Subscription> {
        let (subscription_id, rx) = self.open(filter)?;
        Ok(Subscription::new(self.clone(), subscription_id, rx))
    }

    fn open(&self, filter: Filter) -> Result<(String, StreamReceiver)> {
        let subscription_id = generate_subscription_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.routes.lock().insert(subscription_id.clone(), tx);

        let req = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters: vec![filter],
        };
        if let Err(e) = self.send(&req) {
            self.inner.routes.lock().remove(&subscription_id);
            return Err(e);
        }

        debug!("Opened subscription {} on {}", subscription_id, self.url());
        Ok((subscription_id, rx))
    }

    /// Send an event; the waiter resolves when the relay answers with OK.
    ///
    /// Publishing the same event twice on one link gives two waiters, and one
    /// OK answers both.
    pub fn publish(&self, event: &Event) -> Result<AckWaiter> {
        let waiter = self.await_ack(&event.id);
        self.send(&ClientMessage::Event(event.clone()))?;

        debug!("Sent event {} to {}", event.id, self.url());
        Ok(waiter)
    }

    /// Number of publishes still waiting for an OK on this link.
    pub fn pending_acks(&self) -> usize {
        self.inner.pending_acks.lock().values().map(Vec::len).sum()
    }

    fn await_ack(&self, event_id: &str) -> AckWaiter {
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending_acks
            .lock()
            .entry(event_id.to_string())
            .or_default()
            .push(tx);

        AckWaiter {
            event_id: event_id.to_string(),
            rx,
            link: Arc::downgrade(&self.inner),
        }
    }

    /// Queue a message for the writer task.
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        let session = self.inner.session.lock();
        let session = session.as_ref().ok_or(ClientError::NotConnected)?;
        session
            .outbound
            .send(Message::text(text))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Forget a subscription and tell the relay, if it is still listening.
    pub(crate) fn release(&self, subscription_id: &str) {
        if self.inner.routes.lock().remove(subscription_id).is_none() {
            return;
        }

        let close = ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        };
        if let Err(e) = self.send(&close) {
            debug!("Skipping CLOSE {} on {}: {}", subscription_id, self.url(), e);
        }
    }

    /// Number of open subscriptions on this link.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.routes.lock().len()
    }
}

impl LinkInner {
    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.write();
            let changed = *current != state;
            *current = state;
            changed
        };

        if changed {
            debug!("Relay {} is now {}", self.url, state);
            self.notifier.relay_state_changed(&self.url, state);
        }
    }

    fn start_session(self: &Arc<Self>, ws: WsStream) {
        // Held until the session is stored so a fast failure in the reader
        // cannot run before it.
        let mut slot = self.session.lock();

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let url = self.url.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("WebSocket send to {} failed: {}", url, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let weak = Arc::downgrade(self);
        let reader = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => match weak.upgrade() {
                        Some(inner) => inner.handle_frame(text.as_str()),
                        None => return,
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break format!("closed by relay ({:?})", frame);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            if let Some(inner) = weak.upgrade() {
                inner.on_transport_lost(generation, &reason);
            }
        });

        *slot = Some(Session {
            generation,
            outbound,
            reader,
            writer,
        });
        self.set_state(ConnectionState::Connected);
    }

    fn on_transport_lost(&self, generation: u64, reason: &str) {
        let mut slot = self.session.lock();
        if slot.as_ref().map(|s| s.generation) != Some(generation) {
            return;
        }
        if let Some(session) = slot.take() {
            session.writer.abort();
        }

        warn!("Lost connection to {}: {}", self.url, reason);
        self.drop_pending();
        self.set_state(ConnectionState::Failed);
    }

    /// Tear down the current session, if any. Returns whether one existed.
    fn shutdown(&self) -> bool {
        // Dropping the outbound sender lets the writer flush and send a close frame.
        let session = self.session.lock().take();
        let existed = session.is_some();
        if let Some(session) = session {
            session.reader.abort();
        }

        self.drop_pending();
        self.set_state(ConnectionState::Disconnected);
        existed
    }

    fn forget_closed_acks(&self, event_id: &str) {
        let mut pending = self.pending_acks.lock();
        if let Some(waiters) = pending.get_mut(event_id) {
            waiters.retain(|tx| !tx.is_closed());
            if waiters.is_empty() {
                pending.remove(event_id);
            }
        }
    }

    fn drop_pending(&self) {
        self.routes.lock().clear();
        self.pending_acks.lock().clear();
    }

    fn handle_frame(&self, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed message from {}: {}", self.url, e);
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if self.config.verify_signatures
                    && let Err(e) = self.codec.verify(&event)
                {
                    warn!("Discarding invalid event {} from {}: {}", event.id, self.url, e);
                    return;
                }
                self.route(&subscription_id, StreamItem::Event(event));
            }
            RelayMessage::Eose { subscription_id } => {
                debug!("EOSE {} from {}", subscription_id, self.url);
                self.route(&subscription_id, StreamItem::Eose);
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                if let Some(tx) = self.routes.lock().remove(&subscription_id) {
                    let _ = tx.send(StreamItem::Closed(message));
                }
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                let ack = Ack::from_ok(success, &message);
                match self.pending_acks.lock().remove(&event_id) {
                    Some(waiters) => {
                        for tx in waiters {
                            let _ = tx.send(ack.clone());
                        }
                    }
                    None => debug!("Unsolicited OK for {} from {}", event_id, self.url),
                }
            }
            RelayMessage::Notice { message } => {
                info!("NOTICE from {}: {}", self.url, message);
            }
            RelayMessage::Auth { .. } => {
                debug!("Ignoring AUTH challenge from {}", self.url);
            }
        }
    }

    fn route(&self, subscription_id: &str, item: StreamItem) {
        let mut routes = self.routes.lock();
        let receiver_gone = routes
            .get(subscription_id)
            .is_some_and(|tx| tx.send(item).is_err());
        if receiver_gone {
            routes.remove(subscription_id);
        }
    }
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.reader.abort();
        }
    }
}
