//! NIP-18: Reposts
//!
//! A kind 6 repost carries the original note's id in an "e" tag and, when the
//! reposting client was polite, the whole original event serialized into the
//! content. An embedded original that verifies saves a network round trip.

use crate::codec::EventCodec;
use crate::nip01::{Event, EventTemplate, Kind};
use tracing::debug;

/// Event kind for reposts of short text notes
pub const REPOST_KIND: u16 = 6;

/// The original event embedded in a repost's content, if it parses and verifies.
pub fn embedded_event(repost: &Event, codec: &dyn EventCodec) -> Option<Event> {
    if repost.kind_type() != Kind::Repost || repost.content.trim().is_empty() {
        return None;
    }

    let original: Event = serde_json::from_str(&repost.content).ok()?;
    match codec.verify(&original) {
        Ok(()) => Some(original),
        Err(e) => {
            debug!("Repost {} embeds an invalid event: {}", repost.id, e);
            None
        }
    }
}

/// Id of the reposted event, from the first "e" tag.
pub fn reposted_event_id(repost: &Event) -> Option<&str> {
    if repost.kind_type() != Kind::Repost {
        return None;
    }
    repost.first_tag_value("e")
}

/// Template for reposting `original`, embedding it in the content.
pub fn repost_template(original: &Event, relay_hint: Option<&str>) -> EventTemplate {
    let content = serde_json::to_string(original).unwrap_or_default();
    EventTemplate::new(Kind::Repost, content).with_tags(vec![
        vec![
            "e".to_string(),
            original.id.clone(),
            relay_hint.unwrap_or_default().to_string(),
        ],
        vec!["p".to_string(), original.pubkey.clone()],
    ])
}
