//! NIP-01: Basic protocol flow description.
//!
//! This module holds the event model shared by every other part of the workspace:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical serialization used for content addressing
//! - Kind classification for the kinds the feed engine understands
//! - Tag accessors used by reference resolution

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("verification error: {0}")]
    Verification(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// A signed Nostr event.
///
/// Events are immutable once validated: nothing in this workspace recomputes or
/// rewrites `id` after a codec has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

impl Event {
    /// Typed view of the numeric kind.
    pub fn kind_type(&self) -> Kind {
        Kind::from(self.kind)
    }

    /// Values at position 1 of every tag named `name`, in tag order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }

    /// First value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1).map(String::as_str))
    }

    /// The tag at a positional index, as referenced by inline `#[n]` markers.
    pub fn tag_at(&self, index: usize) -> Option<&[String]> {
        self.tags.get(index).map(Vec::as_slice)
    }

    /// Strip the signature and id, leaving the hashed fields.
    pub fn to_unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// A template for creating events (without pubkey, which comes from the signing key).
///
/// ```
/// use nostr::{EventTemplate, Kind, unix_now};
///
/// let template = EventTemplate::new(Kind::Note, "Hello Nostr!")
///     .with_tags(vec![vec!["p".to_string(), "ab".repeat(32)]])
///     .at(unix_now());
/// assert_eq!(template.kind, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current time and no tags.
    pub fn new(kind: Kind, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind: kind.as_u16(),
            tags: Vec::new(),
            content: content.into(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Vec<String>>) -> Self {
        self.tags = tags;
        self
    }

    pub fn at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Event kinds the sync engine treats specially.
///
/// Anything else travels through the engine untouched as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Kind 0: profile metadata, content is a JSON object
    Profile,
    /// Kind 1: short text note
    Note,
    /// Kind 3: contact (follow) list
    ContactList,
    /// Kind 4: encrypted direct message
    DirectMessage,
    /// Kind 5: deletion request
    Deleted,
    /// Kind 6: repost of a note
    Repost,
    /// Kind 7: reaction to a note
    Reaction,
    Other(u16),
}

impl Kind {
    pub fn as_u16(self) -> u16 {
        match self {
            Kind::Profile => 0,
            Kind::Note => 1,
            Kind::ContactList => 3,
            Kind::DirectMessage => 4,
            Kind::Deleted => 5,
            Kind::Repost => 6,
            Kind::Reaction => 7,
            Kind::Other(kind) => kind,
        }
    }
}

impl From<u16> for Kind {
    fn from(kind: u16) -> Self {
        match kind {
            0 => Kind::Profile,
            1 => Kind::Note,
            3 => Kind::ContactList,
            4 => Kind::DirectMessage,
            5 => Kind::Deleted,
            6 => Kind::Repost,
            7 => Kind::Reaction,
            other => Kind::Other(other),
        }
    }
}

impl From<Kind> for u16 {
    fn from(kind: Kind) -> Self {
        kind.as_u16()
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serialize an unsigned event for hashing.
///
/// Format: `[0, pubkey, created_at, kind, tags, content]`
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::InvalidEvent(
            "can't serialize event with wrong or missing properties".to_string(),
        ));
    }

    serde_json::to_string(&(
        0,
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    ))
    .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Structural check of a signed event (lengths and hex alphabet), without crypto.
pub fn validate_event_shape(event: &Event) -> bool {
    is_lower_hex(&event.id, 64) && is_lower_hex(&event.pubkey, 64) && is_lower_hex(&event.sig, 128)
}

pub(crate) fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Sort events in reverse-chronological order by created_at,
/// then by id (lexicographically) in case of ties.
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}
