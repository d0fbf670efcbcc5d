//! NIP-08: Handling Mentions
//!
//! Inline `#[n]` markers in a note's content point at the tag with index `n`.
//! The tag decides what is mentioned: an "e" tag names an event, a "p" tag a
//! profile. Markers pointing past the end of the tag list, or at any other
//! tag, are plain text.

use crate::nip01::Event;

/// What an inline marker resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Mention {
    Event(String),
    Profile(String),
}

/// Tag indices referenced by `#[n]` markers, in content order, without repeats.
pub fn mention_indices(content: &str) -> Vec<usize> {
    let mut indices = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find("#[") {
        let after = &rest[start + 2..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();

        if digits > 0
            && after.as_bytes().get(digits) == Some(&b']')
            && let Ok(index) = after[..digits].parse::<usize>()
            && !indices.contains(&index)
        {
            indices.push(index);
        }

        rest = after;
    }

    indices
}

/// Resolve every inline marker of `event` against its own tags.
pub fn mentions(event: &Event) -> Vec<Mention> {
    mention_indices(&event.content)
        .into_iter()
        .filter_map(|index| {
            let tag = event.tag_at(index)?;
            let value = tag.get(1)?.clone();
            match tag.first().map(String::as_str) {
                Some("e") => Some(Mention::Event(value)),
                Some("p") => Some(Mention::Profile(value)),
                _ => None,
            }
        })
        .collect()
}
