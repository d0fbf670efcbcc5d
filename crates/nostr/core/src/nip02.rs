//! NIP-02: Follow List (Contact List and Petnames)
//!
//! A kind 3 event lists followed profiles as "p" tags with an optional relay
//! hint and petname. The "following" feed is built from these pubkeys.
//!
//! See: <https://github.com/nostr-protocol/nips/blob/master/02.md>

use crate::nip01::{Event, EventTemplate, Kind, is_lower_hex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during NIP-02 operations
#[derive(Debug, Error)]
pub enum Nip02Error {
    #[error("invalid event kind: expected 3, got {0}")]
    InvalidKind(u16),

    #[error("invalid p-tag format: {0}")]
    InvalidPTag(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// A single contact in a follow list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// The public key of the followed profile (32-byte hex)
    pub pubkey: String,

    /// Optional relay URL where this profile can be found
    pub relay_url: Option<String>,

    /// Optional local petname for this contact
    pub petname: Option<String>,
}

impl Contact {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relay_url: None,
            petname: None,
        }
    }

    /// Convert contact to a p-tag array
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "p".to_string(),
            self.pubkey.clone(),
            self.relay_url.clone().unwrap_or_default(),
        ];
        if let Some(ref petname) = self.petname {
            tag.push(petname.clone());
        }
        tag
    }

    /// Parse a contact from a p-tag array
    pub fn from_tag(tag: &[String]) -> Result<Self, Nip02Error> {
        match tag.first().map(String::as_str) {
            Some("p") => {}
            _ => {
                return Err(Nip02Error::InvalidPTag(
                    "tag must start with 'p'".to_string(),
                ));
            }
        }

        let pubkey = tag
            .get(1)
            .ok_or_else(|| Nip02Error::InvalidPTag("p-tag must have at least pubkey".to_string()))?;
        if !is_lower_hex(pubkey, 64) {
            return Err(Nip02Error::InvalidPublicKey(pubkey.clone()));
        }

        let non_empty = |idx: usize| tag.get(idx).filter(|s| !s.is_empty()).cloned();

        Ok(Self {
            pubkey: pubkey.clone(),
            relay_url: non_empty(2),
            petname: non_empty(3),
        })
    }
}

/// Decoded kind 3 event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactList {
    /// Author of the list
    pub owner: String,
    pub created_at: u64,
    pub contacts: Vec<Contact>,
}

impl ContactList {
    /// Decode a contact list. Malformed p-tags are skipped rather than
    /// failing the whole list, since relays happily serve lists written by
    /// sloppy clients.
    pub fn from_event(event: &Event) -> Result<Self, Nip02Error> {
        if event.kind_type() != Kind::ContactList {
            return Err(Nip02Error::InvalidKind(event.kind));
        }

        let mut contacts: Vec<Contact> = Vec::new();
        for tag in event.tags.iter().filter(|t| t.first().map(String::as_str) == Some("p")) {
            if let Ok(contact) = Contact::from_tag(tag)
                && !contacts.iter().any(|c| c.pubkey == contact.pubkey)
            {
                contacts.push(contact);
            }
        }

        Ok(Self {
            owner: event.pubkey.clone(),
            created_at: event.created_at,
            contacts,
        })
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.contacts.iter().any(|c| c.pubkey == pubkey)
    }

    /// Followed pubkeys, in list order.
    pub fn pubkeys(&self) -> Vec<String> {
        self.contacts.iter().map(|c| c.pubkey.clone()).collect()
    }

    /// Build a petname index (pubkey -> petname)
    pub fn petname_index(&self) -> HashMap<String, String> {
        self.contacts
            .iter()
            .filter_map(|c| c.petname.as_ref().map(|name| (c.pubkey.clone(), name.clone())))
            .collect()
    }

    /// Template for republishing this list.
    pub fn to_template(&self) -> EventTemplate {
        EventTemplate::new(Kind::ContactList, "")
            .with_tags(self.contacts.iter().map(Contact::to_tag).collect())
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}
