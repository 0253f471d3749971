//! Transit-style key service.
//!
//! The server never holds chat keys. What it does hold is a registry of
//! named symmetric keys (one per user, addressed by `vault_key_id`) used
//! exclusively to wrap other keys and server-visible secrets: inference
//! copies of message bodies, vault-mode embed keys, archived usage blobs,
//! notification email addresses. Wrapped values travel as
//! `vault:v1:<base64>` strings and are sealed with XChaCha20-Poly1305.
//!
//! The sibling [`aes256gcm`] module is a different concern: raw AES-GCM
//! helpers for file-at-rest encryption in the upload pipeline, where the
//! caller owns key and nonce and only ever asks the core to wrap the key.

pub mod aes256gcm;
pub mod error;
pub mod transit;

pub use error::VaultError;
pub use transit::TransitVault;
