//! cryptographic primitives for quorumvault
//!
//! - chacha20poly1305 for authenticated encryption of secret records
//! - hmac-sha256 for share checksums and the root key verifier
//! - sha256 for the integrity tag shared alongside a split secret

use chacha20poly1305::{
    aead::{Aead, KeyInit as AeadKeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hmac::{digest::KeyInit, Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// root key length in bytes
pub const KEY_LEN: usize = 32;

/// aead nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// generate random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// encrypt with chacha20poly1305, binding `aad` into the tag
pub fn encrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher: ChaCha20Poly1305 =
        AeadKeyInit::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// decrypt with chacha20poly1305
///
/// tag failure surfaces as `None` so callers can attach their own context
pub fn decrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Option<Vec<u8>>> {
    let cipher: ChaCha20Poly1305 =
        AeadKeyInit::new_from_slice(key).map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .ok())
}

/// compute hmac-sha256 tag
pub fn mac(key: &[u8], data: &[&[u8]]) -> [u8; 32] {
    // hmac accepts keys of any length, so this cannot fail
    let mut h: HmacSha256 = match KeyInit::new_from_slice(key) {
        Ok(h) => h,
        Err(_) => unreachable!("hmac accepts any key length"),
    };
    for d in data {
        Mac::update(&mut h, d);
    }
    h.finalize().into_bytes().into()
}

/// length of the integrity tag appended to a secret before splitting
pub const SECRET_TAG_LEN: usize = 16;

/// integrity tag over a secret
///
/// the tag is split together with the secret and never stored in the
/// clear, so it is only visible once a threshold of shares is combined
pub fn secret_tag(secret: &[u8]) -> [u8; SECRET_TAG_LEN] {
    let mut h = Sha256::new();
    h.update(b"quorumvault:secret_tag:v1");
    h.update((secret.len() as u32).to_le_bytes());
    h.update(secret);
    let digest = h.finalize();
    let mut tag = [0u8; SECRET_TAG_LEN];
    tag.copy_from_slice(&digest[..SECRET_TAG_LEN]);
    tag
}

/// verifier persisted next to the records so a different root key is
/// rejected on unseal instead of silently orphaning existing data
pub fn key_verifier(key: &[u8; KEY_LEN]) -> [u8; 32] {
    mac(key, &[b"quorumvault:key_verifier:v1"])
}

/// short key identifier recorded in record metadata
pub fn key_id(key: &[u8; KEY_LEN]) -> String {
    hex::encode(&mac(key, &[b"quorumvault:key_id:v1"])[..8])
}

/// constant-time equality
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
