//! Vault error types.

/// Errors produced by key-service operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No key registered under the given `vault_key_id`.
    #[error("unknown vault key: {0}")]
    UnknownKey(String),

    /// The wrapped value is not in the `vault:v1:...` format.
    #[error("malformed wrapped value")]
    MalformedCiphertext,

    /// Encryption or decryption failed (tampered data, wrong key).
    #[error("cipher error: {0}")]
    CipherError(String),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
