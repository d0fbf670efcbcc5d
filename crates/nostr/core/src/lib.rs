//! Nostr event model for the relay sync engine.
//!
//! This crate provides:
//! - NIP-01: Basic protocol (events, canonical serialization, kind classification)
//! - Event codec: content addressing, Schnorr signing and verification
//! - Kind 0 profile metadata decoding
//! - NIP-02: Follow List (Contact List and Petnames)
//! - NIP-04: Encrypted Direct Messages
//! - NIP-08: Handling Mentions (inline `#[n]` markers)
//! - NIP-18: Reposts
//! - NIP-25: Reactions

mod codec;
mod metadata;
mod nip01;
mod nip02;
mod nip04;
mod nip08;
mod nip18;
mod nip25;

// NIP-01: Basic protocol
pub use nip01::{
    Event, EventTemplate, Kind, Nip01Error, UnsignedEvent, serialize_event, sort_events,
    unix_now, validate_event_shape,
};

// Event codec
pub use codec::{
    EventCodec, SchnorrCodec, generate_secret_key, public_key_hex, secret_key_from_hex,
};

// Kind 0: Profile metadata
pub use metadata::{MetadataError, Profile, ProfileMetadata};

// NIP-02: Follow List (Contact List and Petnames)
pub use nip02::{Contact, ContactList, Nip02Error};

// NIP-04: Encrypted Direct Messages
pub use nip04::{
    ENCRYPTED_DM_KIND, Nip04Error, decrypt, decrypt_content, encrypt, encrypt_content,
    shared_secret,
};

// NIP-08: Handling Mentions
pub use nip08::{Mention, mention_indices, mentions};

// NIP-18: Reposts
pub use nip18::{REPOST_KIND, embedded_event, repost_template, reposted_event_id};

// NIP-25: Reactions
pub use nip25::{REACTION_KIND, is_like, reaction_target, reaction_template};
