use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{KDF_CONTEXT_MEDIA_KEY, MEDIA_KEY_SIZE, NONCE_SIZE};
use crate::error::CryptoError;
use crate::types::MediaKind;

pub type MediaKey = [u8; MEDIA_KEY_SIZE];
pub type ContentHash = [u8; 32];

/// Media encrypted for upload, with the content-addressing fields a receiver
/// needs to fetch and verify it.
#[derive(Debug, Clone)]
pub struct SealedMedia {
    pub media_key: MediaKey,
    /// nonce || ciphertext
    pub ciphertext: Vec<u8>,
    /// BLAKE3 of the plaintext
    pub content_hash: ContentHash,
    /// BLAKE3 of `ciphertext`
    pub encrypted_hash: ContentHash,
}

pub fn generate_media_key() -> MediaKey {
    let mut key = [0u8; MEDIA_KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

pub fn content_hash(data: &[u8]) -> ContentHash {
    *blake3::hash(data).as_bytes()
}

/// First 8 bytes of a hash as hex, for logs.
pub fn short_hash(hash: &ContentHash) -> String {
    hex::encode(&hash[..8])
}

// BLAKE3 KDF with domain separation per media kind
fn derive_cipher_key(media_key: &MediaKey, kind: MediaKind) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_MEDIA_KEY);
    hasher.update(media_key);
    hasher.update(kind.as_str().as_bytes());
    *hasher.finalize().as_bytes()
}

/// Encrypt `plaintext` under a fresh media key. Every call yields a new key,
/// so sealing the same bytes twice gives two independent results.
pub fn seal_media(plaintext: &[u8], kind: MediaKind) -> Result<SealedMedia, CryptoError> {
    let media_key = generate_media_key();
    let cipher_key = derive_cipher_key(&media_key, kind);
    let cipher = XChaCha20Poly1305::new((&cipher_key).into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let encrypted = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut ciphertext = Vec::with_capacity(NONCE_SIZE + encrypted.len());
    ciphertext.extend_from_slice(&nonce_bytes);
    ciphertext.extend_from_slice(&encrypted);

    Ok(SealedMedia {
        media_key,
        encrypted_hash: content_hash(&ciphertext),
        content_hash: content_hash(plaintext),
        ciphertext,
    })
}

pub fn open_media(media_key: &MediaKey, kind: MediaKind, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher_key = derive_cipher_key(media_key, kind);
    let cipher = XChaCha20Poly1305::new((&cipher_key).into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
