//! AES-256-GCM helpers for file-at-rest encryption.
//!
//! Used by the upload service, where the per-upload AES key is generated
//! locally and then transit-wrapped by the core. Unlike the transit path,
//! the nonce is caller-supplied and explicit: the image variants of one
//! upload share a single key and a single nonce, and the same pair must
//! later decrypt each stored object independently. Nonce uniqueness is
//! the caller's responsibility.

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, KeyInit, Payload},
};

use crate::error::VaultError;

/// Nonce size for AES-GCM (12 bytes).
pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext`; the output carries the GCM tag but not the nonce.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, VaultError> {
    Aes256Gcm::new(key.into())
        .encrypt(&(*nonce).into(), Payload {
            msg: plaintext,
            aad,
        })
        .map_err(|e| VaultError::CipherError(e.to_string()))
}

/// Decrypt a blob produced by [`encrypt_with_nonce`] with the same key,
/// nonce, and AAD.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, VaultError> {
    Aes256Gcm::new(key.into())
        .decrypt(&(*nonce).into(), Payload {
            msg: ciphertext,
            aad,
        })
        .map_err(|e| VaultError::CipherError(e.to_string()))
}
