//! Object store doubles for exercising the upload orchestrator.

use async_trait::async_trait;
use bytes::Bytes;
use depot_storage::{MemoryBackend, ObjectStore, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type KeyPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;
type ExistsHook = Box<dyn Fn(usize) + Send + Sync>;

/// In-memory store that counts calls and can fail chosen writes.
#[derive(Default)]
pub struct InstrumentedStore {
    inner: MemoryBackend,
    exists_calls: AtomicUsize,
    puts: Mutex<HashMap<String, usize>>,
    fail_put: Mutex<Option<KeyPredicate>>,
    on_exists: Mutex<Option<ExistsHook>>,
}

impl InstrumentedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `put` of a key matching `predicate` fail.
    pub fn fail_puts_where(&self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) {
        *self.fail_put.lock().unwrap() = Some(Box::new(predicate));
    }

    pub fn clear_failures(&self) {
        *self.fail_put.lock().unwrap() = None;
    }

    /// Run `hook` with the 1-based call number on every `exists` call.
    pub fn on_exists(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_exists.lock().unwrap() = Some(Box::new(hook));
    }

    /// Successful writes of `key`.
    pub fn put_count(&self, key: &str) -> usize {
        self.puts.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Successful writes of keys containing `/chunks/`.
    pub fn chunk_puts(&self) -> usize {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.contains("/chunks/"))
            .map(|(_, n)| n)
            .sum()
    }

    /// Chunk keys written more than once.
    pub fn duplicate_chunk_puts(&self) -> Vec<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, n)| k.contains("/chunks/") && **n > 1)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn raw(&self, key: &str) -> Option<Bytes> {
        self.inner.get(key).await.ok()
    }
}

#[async_trait]
impl ObjectStore for InstrumentedStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let call = self.exists_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = self.on_exists.lock().unwrap().as_ref() {
            hook(call);
        }
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let fail = self
            .fail_put
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|p| p(key));
        if fail {
            return Err(StorageError::Io(std::io::Error::other(format!(
                "injected failure writing {key}"
            ))));
        }
        self.inner.put(key, data).await?;
        *self.puts.lock().unwrap().entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
