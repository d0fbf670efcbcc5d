//! Content addressing and signing.
//!
//! The sync engine never hashes or signs on its own; it goes through an
//! [`EventCodec`]. [`SchnorrCodec`] is the BIP-340 implementation every relay
//! on the network expects.

use crate::nip01::{
    Event, EventTemplate, Nip01Error, UnsignedEvent, serialize_event, validate_event_shape,
};
use bitcoin::hashes::{Hash, sha256};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;

/// Produces canonical ids and signatures, and validates received events.
pub trait EventCodec: Send + Sync {
    /// Hex sha256 of the canonical serialization.
    fn compute_id(&self, event: &UnsignedEvent) -> Result<String, Nip01Error>;

    /// Build a complete signed event from a template.
    fn sign(&self, template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error>;

    /// Check shape, id, and signature. `Ok(())` means the event may be stored or emitted.
    fn verify(&self, event: &Event) -> Result<(), Nip01Error>;
}

/// secp256k1 Schnorr codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchnorrCodec;

impl EventCodec for SchnorrCodec {
    fn compute_id(&self, event: &UnsignedEvent) -> Result<String, Nip01Error> {
        let serialized = serialize_event(event)?;
        let hash = sha256::Hash::hash(serialized.as_bytes());
        Ok(hex::encode(hash.as_byte_array()))
    }

    fn sign(&self, template: &EventTemplate, secret_key: &[u8; 32]) -> Result<Event, Nip01Error> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Signing(e.to_string()))?;
        let keypair = Keypair::from_secret_key(&secp, &sk);
        let (xonly_pk, _parity) = keypair.x_only_public_key();

        let unsigned = UnsignedEvent {
            pubkey: hex::encode(xonly_pk.serialize()),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags.clone(),
            content: template.content.clone(),
        };
        let id = self.compute_id(&unsigned)?;

        let message = digest_message(&id).map_err(Nip01Error::Signing)?;
        let sig = secp.sign_schnorr_no_aux_rand(&message, &keypair);

        Ok(Event {
            id,
            pubkey: unsigned.pubkey,
            created_at: unsigned.created_at,
            kind: unsigned.kind,
            tags: unsigned.tags,
            content: unsigned.content,
            sig: hex::encode(sig.serialize()),
        })
    }

    fn verify(&self, event: &Event) -> Result<(), Nip01Error> {
        if !validate_event_shape(event) {
            return Err(Nip01Error::InvalidEvent(format!(
                "malformed id, pubkey, or sig on {}",
                event.id
            )));
        }

        let computed_id = self.compute_id(&event.to_unsigned())?;
        if computed_id != event.id {
            return Err(Nip01Error::Verification(format!(
                "id mismatch: expected {}, got {}",
                computed_id, event.id
            )));
        }

        let message = digest_message(&event.id).map_err(Nip01Error::Verification)?;
        let sig_bytes =
            hex::decode(&event.sig).map_err(|e| Nip01Error::InvalidHex(e.to_string()))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| Nip01Error::InvalidSignature(e.to_string()))?;
        let pubkey = xonly_from_hex(&event.pubkey)?;

        Secp256k1::verification_only()
            .verify_schnorr(&sig, &message, &pubkey)
            .map_err(|e| Nip01Error::InvalidSignature(e.to_string()))
    }
}

fn digest_message(id_hex: &str) -> Result<Message, String> {
    let id_bytes = hex::decode(id_hex).map_err(|e| format!("invalid id hex: {}", e))?;
    Message::from_digest_slice(&id_bytes).map_err(|e| format!("invalid message: {}", e))
}

pub(crate) fn xonly_from_hex(pubkey_hex: &str) -> Result<XOnlyPublicKey, Nip01Error> {
    let bytes = hex::decode(pubkey_hex).map_err(|e| Nip01Error::InvalidHex(e.to_string()))?;
    XOnlyPublicKey::from_slice(&bytes).map_err(|e| Nip01Error::InvalidPublicKey(e.to_string()))
}

/// Generate a random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Parse a hex-encoded secret key.
pub fn secret_key_from_hex(secret_hex: &str) -> Result<[u8; 32], Nip01Error> {
    let bytes = hex::decode(secret_hex).map_err(|e| Nip01Error::InvalidHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| Nip01Error::InvalidHex("secret key must be 32 bytes".to_string()))
}

/// Get the x-only public key as hex from a secret key.
pub fn public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key)
        .map_err(|e| Nip01Error::InvalidPublicKey(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(hex::encode(xonly.serialize()))
}
