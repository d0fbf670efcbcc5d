//! NIP-01 wire frames and subscription filters.
//!
//! Outbound frames are EVENT, REQ and CLOSE. Inbound frames are EVENT, OK,
//! EOSE, CLOSED, NOTICE and AUTH; anything else is rejected by label.

use nostr::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Wire form of this message.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let frame = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![Value::from("REQ"), Value::from(subscription_id.as_str())];
                for filter in filters {
                    frame.push(serde_json::to_value(filter)?);
                }
                Value::Array(frame)
            }
            ClientMessage::Close { subscription_id } => serde_json::json!(["CLOSE", subscription_id]),
        };
        Ok(frame.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

/// String at `idx`, or an error naming the missing `field`.
fn str_at(frame: &[Value], idx: usize, field: &str) -> Result<String, MessageError> {
    match frame.get(idx) {
        None => Err(MessageError::MissingField(field.to_string())),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MessageError::InvalidFormat(format!("{field} not a string"))),
    }
}

/// Free-form relay text; a non-string reason reads as empty.
fn reason_at(frame: &[Value], idx: usize, field: &str) -> Result<String, MessageError> {
    frame
        .get(idx)
        .map(|value| value.as_str().unwrap_or_default().to_string())
        .ok_or_else(|| MessageError::MissingField(field.to_string()))
}

impl RelayMessage {
    /// Parse one relay frame.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let frame: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        let Some(label) = frame.first() else {
            return Err(MessageError::InvalidFormat("empty array".to_string()));
        };
        let label = label
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("label not a string".to_string()))?;

        let message = match label {
            "EVENT" => {
                let subscription_id = str_at(&frame, 1, "subscription_id")?;
                let raw = frame
                    .get(2)
                    .cloned()
                    .ok_or_else(|| MessageError::MissingField("event".to_string()))?;
                RelayMessage::Event {
                    subscription_id,
                    event: serde_json::from_value(raw)?,
                }
            }
            "OK" => {
                let event_id = str_at(&frame, 1, "event_id")?;
                let success = frame
                    .get(2)
                    .ok_or_else(|| MessageError::MissingField("success".to_string()))?
                    .as_bool()
                    .ok_or_else(|| MessageError::InvalidFormat("success not a boolean".to_string()))?;
                RelayMessage::Ok {
                    event_id,
                    success,
                    message: reason_at(&frame, 3, "message")?,
                }
            }
            "EOSE" => RelayMessage::Eose {
                subscription_id: str_at(&frame, 1, "subscription_id")?,
            },
            "CLOSED" => RelayMessage::Closed {
                subscription_id: str_at(&frame, 1, "subscription_id")?,
                message: reason_at(&frame, 2, "message")?,
            },
            "NOTICE" => RelayMessage::Notice {
                message: str_at(&frame, 1, "message")?,
            },
            "AUTH" => RelayMessage::Auth {
                challenge: str_at(&frame, 1, "challenge")?,
            },
            other => return Err(MessageError::UnknownType(other.to_string())),
        };
        Ok(message)
    }
}

/// Filter for subscription requests.
///
/// A filter with no constraints matches everything. `since` and `until`
/// are both inclusive bounds on `created_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Event IDs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    /// Authors (pubkeys)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,

    /// Event kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,

    /// Events since timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Events until timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<u64>,

    /// Maximum number of events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Generic tag queries (e.g., #e, #p)
    /// The key is the tag letter (without #), value is list of values
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, Vec<String>>,
}

impl Filter {
    /// Create a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by event IDs.
    pub fn ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Filter by authors.
    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = Some(authors);
        self
    }

    /// Filter by kinds.
    pub fn kinds(mut self, kinds: Vec<u16>) -> Self {
        self.kinds = Some(kinds);
        self
    }

    /// Filter by events since timestamp.
    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Filter by events until timestamp.
    pub fn until(mut self, timestamp: u64) -> Self {
        self.until = Some(timestamp);
        self
    }

    /// Limit number of results.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Add a tag filter. The key should be the tag letter (e.g., "e", "p").
    pub fn tag(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.tags.insert(format!("#{}", key.into()), values);
        self
    }

    /// Filter by #e (event reference) tags.
    pub fn event_refs(self, event_ids: Vec<String>) -> Self {
        self.tag("e", event_ids)
    }

    /// Filter by #p (pubkey reference) tags.
    pub fn pubkey_refs(self, pubkeys: Vec<String>) -> Self {
        self.tag("p", pubkeys)
    }

    /// Whether `event` satisfies every constraint of this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.contains(&event.id)
        {
            return false;
        }
        if let Some(authors) = &self.authors
            && !authors.contains(&event.pubkey)
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }
        if self.since.is_some_and(|since| event.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| event.created_at > until) {
            return false;
        }

        self.tags.iter().all(|(key, values)| {
            let name = key.trim_start_matches('#');
            event
                .tag_values(name)
                .any(|value| values.iter().any(|v| v == value))
        })
    }

    /// True when the filter names specific ids, authors, or tag values.
    ///
    /// Secondary fetches are only issued for filters with an identity scope;
    /// a kind-only filter would match unrelated data.
    pub fn has_identity_scope(&self) -> bool {
        let non_empty = |values: &Option<Vec<String>>| values.as_ref().is_some_and(|v| !v.is_empty());
        non_empty(&self.ids)
            || non_empty(&self.authors)
            || self.tags.values().any(|values| !values.is_empty())
    }
}
