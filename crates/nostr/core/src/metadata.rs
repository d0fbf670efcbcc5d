//! Kind 0 profile metadata.
//!
//! Profile content is a JSON object with loosely agreed field names. Only the
//! common ones get typed fields; everything else is kept in `extra` so the
//! consumer can render whatever it understands.

use crate::nip01::{Event, Kind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid event kind: expected 0, got {0}")]
    InvalidKind(u16),

    #[error("invalid metadata content: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Decoded profile content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
    /// Fields without a typed slot
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileMetadata {
    /// Decode the content of a kind 0 event.
    pub fn from_event(event: &Event) -> Result<Self, MetadataError> {
        if event.kind_type() != Kind::Profile {
            return Err(MetadataError::InvalidKind(event.kind));
        }
        Ok(serde_json::from_str(&event.content)?)
    }

    /// Best human-readable label: display name, then name.
    pub fn label(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref().filter(|s| !s.is_empty()))
    }
}

/// A resolved profile along with the event it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub pubkey: String,
    /// created_at of the kind 0 event; newer events replace older ones
    pub created_at: u64,
    pub metadata: ProfileMetadata,
}

impl Profile {
    pub fn from_event(event: &Event) -> Result<Self, MetadataError> {
        Ok(Self {
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            metadata: ProfileMetadata::from_event(event)?,
        })
    }
}
