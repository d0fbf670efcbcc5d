//! NIP-25: Reactions
//!
//! A kind 7 reaction points at its target with an "e" tag. Reactions are
//! indexed by the first "e" tag.

use crate::nip01::{Event, EventTemplate, Kind};

/// Event kind for reactions
pub const REACTION_KIND: u16 = 7;

/// Target event id of a reaction, from its first "e" tag.
pub fn reaction_target(reaction: &Event) -> Option<&str> {
    if reaction.kind_type() != Kind::Reaction {
        return None;
    }
    reaction.first_tag_value("e")
}

/// Whether the reaction content is a like ("+" or empty).
pub fn is_like(reaction: &Event) -> bool {
    matches!(reaction.content.as_str(), "+" | "")
}

/// Template reacting to `target` with `content` ("+" for a like).
pub fn reaction_template(target: &Event, content: &str) -> EventTemplate {
    EventTemplate::new(Kind::Reaction, content).with_tags(vec![
        vec!["e".to_string(), target.id.clone()],
        vec!["p".to_string(), target.pubkey.clone()],
    ])
}
