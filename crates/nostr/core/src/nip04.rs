//! NIP-04: Encrypted Direct Message
//!
//! Kind 4 content is `base64(ciphertext)?iv=base64(iv)`, encrypted with
//! AES-256-CBC (PKCS#7 padding) under the unhashed x-coordinate of the
//! secp256k1 ECDH point between sender and recipient.

use crate::codec::xonly_from_hex;
use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bitcoin::secp256k1::{Parity, SecretKey, ecdh};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use thiserror::Error;

/// Event kind for encrypted direct messages
pub const ENCRYPTED_DM_KIND: u16 = 4;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Debug, Error)]
pub enum Nip04Error {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("plaintext is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// 32-byte shared secret between our secret key and their x-only pubkey.
pub fn shared_secret(secret_key: &[u8; 32], pubkey_hex: &str) -> Result<[u8; 32], Nip04Error> {
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;
    let their_pk = xonly_from_hex(pubkey_hex)
        .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?
        .public_key(Parity::Even);

    let point = ecdh::shared_secret_point(&their_pk, &sk);
    let mut x = [0u8; 32];
    x.copy_from_slice(&point[..32]);
    Ok(x)
}

/// Decrypt raw ciphertext with an explicit iv.
pub fn decrypt(ciphertext: &[u8], shared_secret: &[u8; 32], iv: &[u8]) -> Result<String, Nip04Error> {
    let cipher = Aes256CbcDec::new_from_slices(shared_secret, iv)
        .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| Nip04Error::Decrypt(e.to_string()))?;
    Ok(String::from_utf8(plaintext)?)
}

/// Encrypt plaintext with an explicit iv.
pub fn encrypt(plaintext: &str, shared_secret: &[u8; 32], iv: &[u8; 16]) -> Result<Vec<u8>, Nip04Error> {
    let cipher = Aes256CbcEnc::new_from_slices(shared_secret, iv)
        .map_err(|e| Nip04Error::InvalidKey(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes()))
}

/// Decrypt a kind 4 content string.
pub fn decrypt_content(content: &str, shared_secret: &[u8; 32]) -> Result<String, Nip04Error> {
    let (ciphertext_b64, iv_b64) = content
        .split_once("?iv=")
        .ok_or_else(|| Nip04Error::MalformedContent("missing ?iv= separator".to_string()))?;

    let ciphertext = STANDARD.decode(ciphertext_b64)?;
    let iv = STANDARD.decode(iv_b64)?;
    if iv.len() != 16 {
        return Err(Nip04Error::MalformedContent(format!(
            "iv must be 16 bytes, got {}",
            iv.len()
        )));
    }

    decrypt(&ciphertext, shared_secret, &iv)
}

/// Encrypt plaintext into a kind 4 content string with a fresh random iv.
pub fn encrypt_content(plaintext: &str, shared_secret: &[u8; 32]) -> Result<String, Nip04Error> {
    let mut iv = [0u8; 16];
    rand::rng().fill_bytes(&mut iv);
    let ciphertext = encrypt(plaintext, shared_secret, &iv)?;
    Ok(format!("{}?iv={}", STANDARD.encode(ciphertext), STANDARD.encode(iv)))
}
