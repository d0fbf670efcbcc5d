//! Reaction index.
//!
//! Maps a target event id to the set of reactions pointing at it. Entries are
//! only ever added for the lifetime of the process.

use nostr::{Event, Kind, reaction_target};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared, append-only index of reactions by target event id. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ReactionIndex {
    inner: Arc<RwLock<HashMap<String, Vec<Event>>>>,
}

impl ReactionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a reaction under its first "e" tag.
    ///
    /// Returns the target id when the reaction was new. Non-reactions,
    /// reactions without a target, and repeats are ignored.
    pub fn insert(&self, reaction: Event) -> Option<String> {
        if reaction.kind_type() != Kind::Reaction {
            return None;
        }
        let target = reaction_target(&reaction)?.to_string();

        let mut index = self.inner.write();
        let entry = index.entry(target.clone()).or_default();
        if entry.iter().any(|r| r.id == reaction.id) {
            return None;
        }
        entry.push(reaction);
        Some(target)
    }

    /// Index many reactions; returns only the newly added ones grouped by target.
    pub fn merge(&self, reactions: impl IntoIterator<Item = Event>) -> HashMap<String, Vec<Event>> {
        let mut added: HashMap<String, Vec<Event>> = HashMap::new();
        for reaction in reactions {
            if let Some(target) = self.insert(reaction.clone()) {
                added.entry(target).or_default().push(reaction);
            }
        }
        added
    }

    /// Reactions to `event_id`, in insertion order.
    pub fn reactions_for(&self, event_id: &str) -> Vec<Event> {
        self.inner.read().get(event_id).cloned().unwrap_or_default()
    }

    pub fn count(&self, event_id: &str) -> usize {
        self.inner.read().get(event_id).map_or(0, Vec::len)
    }

    /// Number of distinct targets.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
