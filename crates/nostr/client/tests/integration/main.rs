//! Integration tests for the sync engine against in-process relays
//!
//! Each [`MockRelay`] is a minimal NIP-01 relay: it stores events, answers
//! REQ with matching stored events followed by EOSE, pushes new events to
//! open subscriptions, and acknowledges EVENT with OK. It also records every
//! filter it was asked for so tests can assert on outgoing requests.

pub mod feed;
pub mod live;
pub mod pool;
pub mod query;

use futures::{SinkExt, StreamExt};
use nostr::{Event, EventCodec, EventTemplate, Kind, SchnorrCodec, generate_secret_key};
use nostr_sync::{Filter, SyncClient, SyncConfig, SyncEvent};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// How a mock relay behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Answer REQ with stored events and EOSE, accept every EVENT
    Normal,
    /// Accept connections but never answer anything
    Silent,
    /// Answer REQ normally, refuse every EVENT
    Reject,
}

struct MockState {
    mode: Mutex<RelayMode>,
    events: Mutex<Vec<Event>>,
    filters: Mutex<Vec<Filter>>,
    closed: Mutex<Vec<String>>,
    live: broadcast::Sender<Event>,
}

pub struct MockRelay {
    url: String,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start() -> Self {
        Self::with_mode(RelayMode::Normal).await
    }

    pub async fn with_mode(mode: RelayMode) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (live, _) = broadcast::channel(256);
        let state = Arc::new(MockState {
            mode: Mutex::new(mode),
            events: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            live,
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        serve(ws, state).await;
                    }
                });
            }
        });

        Self { url, state, task }
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Store events so later REQs can return them.
    pub fn seed(&self, events: impl IntoIterator<Item = Event>) {
        self.state.events.lock().extend(events);
    }

    /// Store an event and push it to every open subscription it matches.
    pub fn inject(&self, event: Event) {
        self.state.events.lock().push(event.clone());
        let _ = self.state.live.send(event);
    }

    pub fn stored(&self) -> Vec<Event> {
        self.state.events.lock().clone()
    }

    /// Every filter received in a REQ, in arrival order.
    pub fn filters(&self) -> Vec<Filter> {
        self.state.filters.lock().clone()
    }

    /// Subscription ids the client sent CLOSE for.
    pub fn closed(&self) -> Vec<String> {
        self.state.closed.lock().clone()
    }

    pub fn set_mode(&self, mode: RelayMode) {
        *self.state.mode.lock() = mode;
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>, state: Arc<MockState>) {
    let (mut write, mut read) = ws.split();
    let mut live = state.live.subscribe();
    let mut subs: HashMap<String, Filter> = HashMap::new();

    loop {
        tokio::select! {
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                for reply in handle_frame(&text, &state, &mut subs) {
                    if write.send(Message::text(reply.to_string())).await.is_err() {
                        return;
                    }
                }
            }
            Ok(event) = live.recv() => {
                for (sub_id, filter) in &subs {
                    if filter.matches(&event) {
                        let frame = json!(["EVENT", sub_id, event]);
                        if write.send(Message::text(frame.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn handle_frame(text: &str, state: &MockState, subs: &mut HashMap<String, Filter>) -> Vec<Value> {
    let Ok(Value::Array(frame)) = serde_json::from_str::<Value>(text) else {
        return vec![json!(["NOTICE", "could not parse frame"])];
    };
    let mode = *state.mode.lock();

    match frame.first().and_then(Value::as_str) {
        Some("REQ") => {
            let sub_id = frame.get(1).and_then(Value::as_str).unwrap_or_default().to_string();
            let filter: Filter = frame
                .get(2)
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            state.filters.lock().push(filter.clone());
            subs.insert(sub_id.clone(), filter.clone());

            if mode == RelayMode::Silent {
                return vec![];
            }

            let mut matching: Vec<Event> = state
                .events
                .lock()
                .iter()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(limit) = filter.limit {
                matching.truncate(limit as usize);
            }

            let mut replies: Vec<Value> = matching
                .into_iter()
                .map(|e| json!(["EVENT", sub_id, e]))
                .collect();
            replies.push(json!(["EOSE", sub_id]));
            replies
        }
        Some("CLOSE") => {
            if let Some(sub_id) = frame.get(1).and_then(Value::as_str) {
                subs.remove(sub_id);
                state.closed.lock().push(sub_id.to_string());
            }
            vec![]
        }
        Some("EVENT") => {
            let Some(event) = frame
                .get(1)
                .cloned()
                .and_then(|v| serde_json::from_value::<Event>(v).ok())
            else {
                return vec![json!(["NOTICE", "invalid event"])];
            };

            match mode {
                RelayMode::Silent => vec![],
                RelayMode::Reject => vec![json!(["OK", event.id, false, "blocked: not on allowlist"])],
                RelayMode::Normal => {
                    let duplicate = state.events.lock().iter().any(|e| e.id == event.id);
                    if duplicate {
                        return vec![json!(["OK", event.id, true, "duplicate: already have this event"])];
                    }
                    state.events.lock().push(event.clone());
                    let _ = state.live.send(event.clone());
                    vec![json!(["OK", event.id, true, ""])]
                }
            }
        }
        _ => vec![json!(["NOTICE", "unsupported message"])],
    }
}

/// Sign an event of `kind` at `created_at`.
pub fn signed(secret_key: &[u8; 32], kind: Kind, content: &str, tags: Vec<Vec<&str>>, created_at: u64) -> Event {
    let tags = tags
        .into_iter()
        .map(|t| t.into_iter().map(str::to_string).collect())
        .collect();
    let template = EventTemplate::new(kind, content).with_tags(tags).at(created_at);
    SchnorrCodec.sign(&template, secret_key).unwrap()
}

pub fn note(secret_key: &[u8; 32], content: &str, created_at: u64) -> Event {
    signed(secret_key, Kind::Note, content, vec![], created_at)
}

pub fn profile(secret_key: &[u8; 32], name: &str, created_at: u64) -> Event {
    let content = json!({ "name": name }).to_string();
    signed(secret_key, Kind::Profile, &content, vec![], created_at)
}

pub fn new_key() -> [u8; 32] {
    generate_secret_key()
}

/// Test config: the given relays, short timeouts.
pub fn test_config(relays: Vec<String>) -> SyncConfig {
    SyncConfig::default()
        .with_relays(relays)
        .with_timeouts(2, 1)
}

/// A client connected to every relay in `relays`.
pub async fn connected_client(relays: &[&MockRelay]) -> SyncClient {
    let client = SyncClient::new(test_config(relays.iter().map(|r| r.url()).collect()));
    client.connect().await;
    client
}

/// Wait for the first notification matching `pick`.
pub async fn wait_for<T>(
    rx: &mut broadcast::Receiver<SyncEvent>,
    mut pick: impl FnMut(SyncEvent) -> Option<T>,
) -> T {
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("notification channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}
