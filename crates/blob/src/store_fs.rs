//! Filesystem-backed object store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::{BlobError, Result, store::ObjectStore};

/// Filesystem implementation rooted at a base directory; buckets become
/// top-level directories and `/`-separated keys become nested paths.
pub struct FsObjectStore {
    base_dir: PathBuf,
}

impl FsObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        // Reject traversal; keys come from internal code but the check is
        // part of the contract.
        if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        let mut path = self.base_dir.join(bucket);
        for seg in key.split('/') {
            path.push(seg);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, content: Vec<u8>) -> Result<()> {
        let path = self.path_for(bucket, key)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &content)?;
            Ok(())
        })
        .await
        .map_err(|e| BlobError::Io(std::io::Error::other(e)))??;
        debug!(bucket, key, "stored object");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(bucket, key)?;
        let (bucket, key) = (bucket.to_string(), key.to_string());
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            if !path.exists() {
                return Err(BlobError::NotFound { bucket, key });
            }
            Ok(std::fs::read(&path)?)
        })
        .await
        .map_err(|e| BlobError::Io(std::io::Error::other(e)))?
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self.path_for(bucket, key)?.exists())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.path_for(bucket, key)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| BlobError::Io(std::io::Error::other(e)))?
    }

    async fn list_prefix(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let root = self.base_dir.join(bucket);
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut keys = Vec::new();
            if root.exists() {
                collect_keys(&root, &root, &mut keys)?;
            }
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| BlobError::Io(std::io::Error::other(e)))?
    }
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("chatfiles", "u1/hash/1_full.bin", vec![9, 9])
            .await
            .unwrap();
        assert!(store.exists("chatfiles", "u1/hash/1_full.bin").await.unwrap());
        assert_eq!(
            store.get("chatfiles", "u1/hash/1_full.bin").await.unwrap(),
            vec![9, 9]
        );

        store.delete("chatfiles", "u1/hash/1_full.bin").await.unwrap();
        assert!(!store.exists("chatfiles", "u1/hash/1_full.bin").await.unwrap());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(matches!(
            store.get("b", "../escape").await.unwrap_err(),
            BlobError::InvalidKey(_)
        ));
    }

    #[tokio::test]
    async fn list_prefix_returns_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put("b", "p/a/1.bin", vec![]).await.unwrap();
        store.put("b", "p/b/2.bin", vec![]).await.unwrap();
        store.put("b", "q/3.bin", vec![]).await.unwrap();

        let keys = store.list_prefix("b", "p/").await.unwrap();
        assert_eq!(keys, vec!["p/a/1.bin".to_string(), "p/b/2.bin".to_string()]);
    }
}
