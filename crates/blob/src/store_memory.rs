//! In-memory object store.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{BlobError, Result, store::ObjectStore};

/// In-memory implementation, keyed by `bucket\x00key`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(bucket: &str, key: &str) -> String {
        format!("{bucket}\x00{key}")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<()> {
        self.objects.insert(Self::full_key(bucket, key), content);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&Self::full_key(bucket, key))
            .map(|v| v.clone())
            .ok_or_else(|| BlobError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(&Self::full_key(bucket, key)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects.remove(&Self::full_key(bucket, key));
        Ok(())
    }

    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = Self::full_key(bucket, prefix);
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(&full_prefix))
            .filter_map(|entry| entry.key().split('\x00').nth(1).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
