//! In-memory storage backend for tests and dry runs.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Object store that keeps everything in a sorted map.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Bytes>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.read().contains_key(key))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.write().insert(key.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.write()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_roundtrip_and_listing() {
        let store = MemoryBackend::new();
        store.put("b/2/x", Bytes::from("2")).await.unwrap();
        store.put("b/1/x", Bytes::from("1")).await.unwrap();
        store.put("c/1/x", Bytes::from("3")).await.unwrap();

        assert_eq!(store.get("b/1/x").await.unwrap(), Bytes::from("1"));
        assert_eq!(store.list("b/").await.unwrap(), vec!["b/1/x", "b/2/x"]);
        assert_eq!(
            store.list_common_prefixes("b/", "/").await.unwrap(),
            vec!["b/1/", "b/2/"]
        );

        store.delete("b/1/x").await.unwrap();
        assert!(!store.exists("b/1/x").await.unwrap());
        assert!(store.get("b/1/x").await.unwrap_err().is_not_found());
        assert_eq!(store.len(), 2);
    }
}
