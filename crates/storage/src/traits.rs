//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeSet;

/// Remote object store used for publishing package versions.
///
/// Keys are `/`-separated paths relative to the store root. Writes of the
/// same key with the same content are idempotent.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Read an entire object. A missing key is `StorageError::NotFound`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write an object, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. A missing key is `StorageError::NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List every key that starts with `prefix`.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// List the distinct key prefixes under `prefix` that end at the next
    /// `delimiter`, e.g. `production/1.0/` for prefix `production/`.
    ///
    /// Results are sorted and include the trailing delimiter.
    async fn list_common_prefixes(&self, prefix: &str, delimiter: &str) -> StorageResult<Vec<String>> {
        let keys = self.list(prefix).await?;
        Ok(common_prefixes(keys.iter().map(String::as_str), prefix, delimiter))
    }

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and usable.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Group `keys` into their common prefixes below `prefix`.
///
/// Keys without a `delimiter` after `prefix` are leaves and contribute nothing.
pub fn common_prefixes<'a>(
    keys: impl IntoIterator<Item = &'a str>,
    prefix: &str,
    delimiter: &str,
) -> Vec<String> {
    if delimiter.is_empty() {
        return Vec::new();
    }
    let set: BTreeSet<String> = keys
        .into_iter()
        .filter_map(|key| {
            let rest = key.strip_prefix(prefix)?;
            let end = rest.find(delimiter)?;
            Some(format!("{prefix}{}{delimiter}", &rest[..end]))
        })
        .collect();
    set.into_iter().collect()
}
