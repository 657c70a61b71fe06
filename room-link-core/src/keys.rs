//! Keys: shared secret, per-room link key derivation, link-level encryption for hosts without
//! radio encryption.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::LinkCryptoError;
use crate::protocol::RoomId;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Link key width (matches a radio local master key).
pub const LINK_KEY_LEN: usize = 16;

const LINK_NONCE_LEN: usize = 12;

/// Secret shared by both nodes of every room. Used directly as the frame MAC key.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        SharedSecret(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Keyed HMAC-SHA256 instance. HMAC accepts keys of any length.
    pub(crate) fn hmac(&self) -> HmacSha256 {
        match <HmacSha256 as Mac>::new_from_slice(&self.0) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        }
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for SharedSecret {
    fn from(s: &str) -> Self {
        SharedSecret::new(s.as_bytes())
    }
}

/// Per-peer transport key. Derived, never used to authenticate frames.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LinkKey([u8; LINK_KEY_LEN]);

impl LinkKey {
    pub fn as_bytes(&self) -> &[u8; LINK_KEY_LEN] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; LINK_KEY_LEN]) -> Self {
        LinkKey(bytes)
    }
}

impl fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LinkKey(<redacted>)")
    }
}

/// HMAC-SHA256(key = shared secret, message = room name), first 16 bytes.
pub fn derive_link_key(room: &RoomId, secret: &SharedSecret) -> LinkKey {
    let mut mac = secret.hmac();
    mac.update(room.name_bytes());
    let digest = mac.finalize().into_bytes();
    let mut key = [0u8; LINK_KEY_LEN];
    key.copy_from_slice(&digest[..LINK_KEY_LEN]);
    LinkKey(key)
}

/// Expand the 16-byte link key to a ChaCha20-Poly1305 key.
fn link_cipher(key: &LinkKey) -> ChaCha20Poly1305 {
    let mut hasher = Sha256::new();
    hasher.update(b"room-link-lmk-v1");
    hasher.update(key.as_bytes());
    let wide: [u8; 32] = hasher.finalize().into();
    ChaCha20Poly1305::new(&wide.into())
}

/// Encrypt a frame for an encrypted peer link. Output: 12-byte random nonce + ciphertext.
pub fn seal_link(key: &LinkKey, plaintext: &[u8]) -> Result<Vec<u8>, LinkCryptoError> {
    let mut nonce_bytes = [0u8; LINK_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = link_cipher(key)
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| LinkCryptoError::Encrypt)?;
    let mut out = Vec::with_capacity(LINK_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a frame sealed by [`seal_link`].
pub fn open_link(key: &LinkKey, sealed: &[u8]) -> Result<Vec<u8>, LinkCryptoError> {
    if sealed.len() < LINK_NONCE_LEN {
        return Err(LinkCryptoError::Truncated);
    }
    let (nonce, ciphertext) = sealed.split_at(LINK_NONCE_LEN);
    link_cipher(key)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| LinkCryptoError::Decrypt)
}
