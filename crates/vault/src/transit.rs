//! Named-key transit wrapping.
//!
//! Mirrors the external transit engine's contract: keys are addressed by
//! `vault_key_id`, plaintexts go in, `vault:v1:<base64>` strings come
//! out, and the reverse. Key material lives only in this process,
//! zeroized on drop. Keys are created at user provisioning time and
//! never leave.
//!
//! There is exactly one sealing construction here (XChaCha20-Poly1305
//! with the key id bound as AAD), so no cipher indirection: the wrapped
//! blob is `base64(nonce || ciphertext || tag)` behind the version
//! prefix, and the prefix itself is the migration point if the
//! construction ever changes.

use std::collections::HashMap;

use {
    base64::Engine,
    chacha20poly1305::{
        XChaCha20Poly1305, XNonce,
        aead::{Aead, KeyInit, Payload},
    },
    rand::RngCore,
    tokio::sync::RwLock,
    zeroize::Zeroizing,
};

use crate::error::VaultError;

/// Prefix carried by every wrapped value.
const WRAPPED_PREFIX: &str = "vault:v1:";

/// XChaCha20 nonce, leading the sealed blob.
const NONCE_LEN: usize = 24;
/// Poly1305 tag, trailing the sealed blob.
const TAG_LEN: usize = 16;

/// In-process transit key service.
pub struct TransitVault {
    keys: RwLock<HashMap<String, Zeroizing<[u8; 32]>>>,
}

impl TransitVault {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Create a fresh random key under `vault_key_id`. Replaces any
    /// existing key with that id.
    pub async fn create_key(&self, vault_key_id: &str) {
        let mut key = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(key.as_mut());
        self.keys.write().await.insert(vault_key_id.to_string(), key);
    }

    /// Register externally provisioned key material (startup only).
    pub async fn import_key(&self, vault_key_id: &str, material: [u8; 32]) {
        self.keys
            .write()
            .await
            .insert(vault_key_id.to_string(), Zeroizing::new(material));
    }

    pub async fn has_key(&self, vault_key_id: &str) -> bool {
        self.keys.read().await.contains_key(vault_key_id)
    }

    /// Wrap `plaintext` under the named key. The key id is bound into the
    /// AAD so a wrapped value cannot be replayed under a different key id.
    pub async fn wrap(&self, vault_key_id: &str, plaintext: &[u8]) -> Result<String, VaultError> {
        let keys = self.keys.read().await;
        let key = keys
            .get(vault_key_id)
            .ok_or_else(|| VaultError::UnknownKey(vault_key_id.to_string()))?;

        // Fresh nonce in front, ciphertext+tag behind it.
        let mut blob = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut blob);
        let nonce = XNonce::clone_from_slice(&blob);
        let sealed = XChaCha20Poly1305::new((&**key).into())
            .encrypt(&nonce, Payload {
                msg: plaintext,
                aad: vault_key_id.as_bytes(),
            })
            .map_err(|e| VaultError::CipherError(e.to_string()))?;
        blob.extend_from_slice(&sealed);

        Ok(format!(
            "{WRAPPED_PREFIX}{}",
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    /// Wrap a UTF-8 string (convenience for message bodies and emails).
    pub async fn wrap_str(&self, vault_key_id: &str, plaintext: &str) -> Result<String, VaultError> {
        self.wrap(vault_key_id, plaintext.as_bytes()).await
    }

    /// Unwrap a `vault:v1:...` value under the named key.
    pub async fn unwrap(&self, vault_key_id: &str, wrapped: &str) -> Result<Vec<u8>, VaultError> {
        let b64 = wrapped
            .strip_prefix(WRAPPED_PREFIX)
            .ok_or(VaultError::MalformedCiphertext)?;
        let blob = base64::engine::general_purpose::STANDARD.decode(b64)?;
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::MalformedCiphertext);
        }
        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        let nonce = XNonce::clone_from_slice(nonce_bytes);

        let keys = self.keys.read().await;
        let key = keys
            .get(vault_key_id)
            .ok_or_else(|| VaultError::UnknownKey(vault_key_id.to_string()))?;

        XChaCha20Poly1305::new((&**key).into())
            .decrypt(&nonce, Payload {
                msg: sealed,
                aad: vault_key_id.as_bytes(),
            })
            .map_err(|_| {
                VaultError::CipherError("unwrap failed (wrong key or tampered value)".to_string())
            })
    }

    /// Unwrap into a UTF-8 string.
    pub async fn unwrap_str(&self, vault_key_id: &str, wrapped: &str) -> Result<String, VaultError> {
        let bytes = self.unwrap(vault_key_id, wrapped).await?;
        String::from_utf8(bytes).map_err(|_| VaultError::MalformedCiphertext)
    }
}

impl Default for TransitVault {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wrap_unwrap_round_trip() {
        let vault = TransitVault::new();
        vault.create_key("user-key-1").await;

        let wrapped = vault.wrap_str("user-key-1", "hello").await.unwrap();
        assert!(wrapped.starts_with("vault:v1:"));
        assert_eq!(vault.unwrap_str("user-key-1", &wrapped).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let vault = TransitVault::new();
        let err = vault.wrap_str("missing", "x").await.unwrap_err();
        assert!(matches!(err, VaultError::UnknownKey(_)));
    }

    #[tokio::test]
    async fn wrapped_value_is_bound_to_key_id() {
        let vault = TransitVault::new();
        vault.create_key("key-a").await;
        let material = {
            // Clone key-a's material into key-b so only the AAD differs.
            let keys = vault.keys.read().await;
            **keys.get("key-a").unwrap()
        };
        vault.import_key("key-b", material).await;

        let wrapped = vault.wrap_str("key-a", "secret").await.unwrap();
        assert!(vault.unwrap_str("key-b", &wrapped).await.is_err());
    }

    #[tokio::test]
    async fn tampered_value_is_rejected() {
        let vault = TransitVault::new();
        vault.create_key("k").await;

        let wrapped = vault.wrap_str("k", "secret").await.unwrap();
        let mut blob = base64::engine::general_purpose::STANDARD
            .decode(wrapped.strip_prefix("vault:v1:").unwrap())
            .unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        let tampered = format!(
            "vault:v1:{}",
            base64::engine::general_purpose::STANDARD.encode(blob)
        );

        assert!(matches!(
            vault.unwrap_str("k", &tampered).await.unwrap_err(),
            VaultError::CipherError(_)
        ));
    }

    #[tokio::test]
    async fn malformed_values_are_rejected() {
        let vault = TransitVault::new();
        vault.create_key("k").await;

        // Wrong prefix.
        assert!(matches!(
            vault.unwrap("k", "not-a-wrapped-value").await.unwrap_err(),
            VaultError::MalformedCiphertext
        ));
        // Prefixed but too short to hold nonce + tag.
        let short = format!(
            "vault:v1:{}",
            base64::engine::general_purpose::STANDARD.encode([0u8; 12])
        );
        assert!(matches!(
            vault.unwrap("k", &short).await.unwrap_err(),
            VaultError::MalformedCiphertext
        ));
    }

    #[tokio::test]
    async fn same_plaintext_wraps_to_distinct_values() {
        let vault = TransitVault::new();
        vault.create_key("k").await;

        let a = vault.wrap_str("k", "same input").await.unwrap();
        let b = vault.wrap_str("k", "same input").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn rewrap_round_trip_preserves_plaintext() {
        // wrap(unwrap(ct)) ≈ ct modulo nonce: the plaintext survives.
        let vault = TransitVault::new();
        vault.create_key("k").await;

        let ct1 = vault.wrap_str("k", "stable").await.unwrap();
        let pt = vault.unwrap_str("k", &ct1).await.unwrap();
        let ct2 = vault.wrap_str("k", &pt).await.unwrap();
        assert_eq!(vault.unwrap_str("k", &ct2).await.unwrap(), "stable");
    }
}
