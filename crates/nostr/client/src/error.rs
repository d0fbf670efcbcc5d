//! Client error types

use crate::message::MessageError;
use thiserror::Error;

/// Client error type
///
/// Per-relay failures (`Connect`, `Protocol`, `Validation`, `PublishRejected`)
/// are logged and contained at the relay boundary by the pool, executor, and
/// publisher. Only whole-operation failures reach callers of those types.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Relay unreachable, handshake failed, or connect timed out
    #[error("Connection error on {url}: {reason}")]
    Connect { url: String, reason: String },

    /// Malformed inbound message
    #[error("Protocol error: {0}")]
    Protocol(#[from] MessageError),

    /// Event id or signature mismatch
    #[error("Invalid event: {0}")]
    Validation(String),

    /// A single relay refused an event
    #[error("Relay {url} rejected event: {reason}")]
    PublishRejected { url: String, reason: String },

    /// Every usable relay refused an event
    #[error("Event {event_id} was rejected by all {} relays", .rejections.len())]
    PublishFailed {
        event_id: String,
        rejections: Vec<(String, String)>,
    },

    /// Operation attempted with zero connected relays
    #[error("No usable relays")]
    NoUsableRelays,

    /// Relay is not a member of the pool
    #[error("Unknown relay: {0}")]
    UnknownRelay(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Signing or local event construction failed
    #[error("Codec error: {0}")]
    Codec(#[from] nostr::Nip01Error),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
