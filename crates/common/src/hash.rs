//! Identifier hashing.
//!
//! Plaintext identifiers (user ids, chat ids, message ids, embed ids) are
//! never stored next to ciphertext; every persisted reference is the
//! lowercase hex SHA-256 of the identifier.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the input.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
