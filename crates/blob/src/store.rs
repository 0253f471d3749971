//! Object store contract.

use async_trait::async_trait;

use crate::Result;

/// Persistence backend for opaque objects, keyed by `(bucket, key)`.
///
/// Keys use `/`-separated paths (`usage-archives/{hash}/{YYYY-MM}/usage.json.gz`,
/// `{user_id}/{content_hash}/{timestamp}_{variant}.bin`). All stored content
/// is ciphertext; the store never interprets it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<()>;
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
    /// List keys under a prefix, lexicographically sorted.
    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}
