//! Typed access to the published layout in an object store.

use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use depot_core::layout;
use depot_core::{BuildType, Manifest, PackageManifest, Validation, VersionDescriptor};
use depot_storage::{ObjectStore, StorageResult};
use futures::future::try_join_all;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Reads and writes manifests, descriptors and chunks at their published keys.
#[derive(Clone)]
pub struct RemoteRepository {
    store: Arc<dyn ObjectStore>,
    public_base_url: Option<String>,
}

impl RemoteRepository {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            public_base_url: None,
        }
    }

    /// Prefix chunk URLs in published manifests with `base`.
    pub fn with_public_base_url(mut self, base: Option<String>) -> Self {
        self.public_base_url = base.filter(|b| !b.is_empty());
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn public_base_url(&self) -> Option<&str> {
        self.public_base_url.as_deref()
    }

    pub async fn object_exists(&self, key: &str) -> StorageResult<bool> {
        self.store.exists(key).await
    }

    pub async fn put_object(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.store.put(key, data).await
    }

    async fn publish(&self, key: String, json: String) -> SyncResult<()> {
        debug!(key = %key, bytes = json.len(), "Publishing document");
        self.store
            .put(&key, Bytes::from(json))
            .await
            .map_err(|source| SyncError::ManifestPublish { key, source })
    }

    /// Write the immutable manifest for `manifest.version`.
    #[instrument(skip_all, fields(build_type = %manifest.build_type, version = %manifest.version))]
    pub async fn put_version_manifest(&self, manifest: &Manifest) -> SyncResult<()> {
        let key = layout::manifest_key(manifest.build_type, &manifest.version);
        self.publish(key, manifest.to_json_pretty()?).await
    }

    /// Point the track's latest manifest at `manifest`.
    #[instrument(skip_all, fields(build_type = %manifest.build_type, version = %manifest.version))]
    pub async fn put_latest_manifest(&self, manifest: &Manifest) -> SyncResult<()> {
        let key = layout::latest_manifest_key(manifest.build_type);
        self.publish(key, manifest.to_json_pretty()?).await
    }

    pub async fn put_version_descriptor(&self, descriptor: &VersionDescriptor) -> SyncResult<()> {
        let key = layout::version_descriptor_key(descriptor.build_type, &descriptor.version);
        self.publish(key, descriptor.to_json_pretty()?).await
    }

    async fn fetch_document(&self, key: &str) -> SyncResult<Option<String>> {
        match self.store.get(key).await {
            Ok(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the manifest published for one version, if any.
    pub async fn fetch_manifest(
        &self,
        build_type: BuildType,
        version: &str,
    ) -> SyncResult<Option<PackageManifest>> {
        let key = layout::manifest_key(build_type, version);
        match self.fetch_document(&key).await? {
            Some(json) => Ok(Some(PackageManifest::parse(&json, Validation::Lenient)?)),
            None => Ok(None),
        }
    }

    /// Fetch the track's latest manifest, if one was ever published.
    pub async fn fetch_latest(&self, build_type: BuildType) -> SyncResult<Option<PackageManifest>> {
        let key = layout::latest_manifest_key(build_type);
        match self.fetch_document(&key).await? {
            Some(json) => Ok(Some(PackageManifest::parse(&json, Validation::Lenient)?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_version_descriptor(
        &self,
        build_type: BuildType,
        version: &str,
    ) -> SyncResult<Option<VersionDescriptor>> {
        let key = layout::version_descriptor_key(build_type, version);
        match self.fetch_document(&key).await? {
            Some(json) => Ok(Some(VersionDescriptor::from_json(&json)?)),
            None => Ok(None),
        }
    }

    /// Versions published under a track, oldest first.
    ///
    /// A version counts as published once its manifest exists; prefixes
    /// holding only chunks are skipped.
    pub async fn list_versions(&self, build_type: BuildType) -> SyncResult<Vec<String>> {
        let prefix = layout::versions_prefix(build_type);
        let candidates: Vec<String> = self
            .store
            .list_common_prefixes(&prefix, "/")
            .await?
            .into_iter()
            .filter_map(|p| {
                p.strip_prefix(&prefix)
                    .map(|v| v.trim_end_matches('/').to_string())
            })
            .filter(|v| !v.is_empty())
            .collect();

        let published = try_join_all(
            candidates
                .iter()
                .map(|v| async move { self.store.exists(&layout::manifest_key(build_type, v)).await }),
        )
        .await?;
        let mut versions: Vec<String> = candidates
            .into_iter()
            .zip(published)
            .filter_map(|(v, published)| published.then_some(v))
            .collect();
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }
}

/// Order version strings by their dot-separated parts, numerically where
/// both parts are numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::{ChunkHash, ChunkRef, FileEntry};
    use depot_storage::MemoryBackend;

    fn remote() -> RemoteRepository {
        RemoteRepository::new(Arc::new(MemoryBackend::new()))
    }

    fn manifest(version: &str) -> Manifest {
        let chunk = ChunkRef::new(ChunkHash::compute(version.as_bytes()), 5, 0);
        Manifest::new(
            version,
            BuildType::Production,
            vec![FileEntry::new("game.bin", vec![chunk])],
        )
    }

    #[test]
    fn test_compare_versions() {
        let mut versions = vec!["1.10.0", "1.2.0", "1.2", "0.9.9", "1.2.0-rc1"];
        versions.sort_by(|a, b| compare_versions(a, b));
        assert_eq!(versions, vec!["0.9.9", "1.2", "1.2.0", "1.2.0-rc1", "1.10.0"]);
    }

    #[tokio::test]
    async fn test_manifest_round_trip_through_store() {
        let remote = remote();
        let manifest = manifest("1.0.0");
        remote.put_version_manifest(&manifest).await.unwrap();

        let fetched = remote
            .fetch_manifest(BuildType::Production, "1.0.0")
            .await
            .unwrap()
            .unwrap()
            .into_chunk_based()
            .unwrap();
        assert_eq!(fetched, manifest);

        assert!(
            remote
                .fetch_manifest(BuildType::Production, "2.0.0")
                .await
                .unwrap()
                .is_none()
        );
        assert!(remote.fetch_latest(BuildType::Production).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_versions_ignores_latest_pointer() {
        let remote = remote();
        for v in ["1.10.0", "1.2.0", "1.9.1"] {
            remote.put_version_manifest(&manifest(v)).await.unwrap();
        }
        remote.put_latest_manifest(&manifest("1.10.0")).await.unwrap();

        assert_eq!(
            remote.list_versions(BuildType::Production).await.unwrap(),
            vec!["1.2.0", "1.9.1", "1.10.0"]
        );
        assert!(remote.list_versions(BuildType::Staging).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_versions_skips_unpublished_prefixes() {
        let remote = remote();
        let published = manifest("1.0.0");
        remote.put_version_manifest(&published).await.unwrap();

        let orphan = ChunkHash::compute(b"orphan");
        remote
            .put_object(
                &layout::chunk_key(BuildType::Production, "1.1.0", &orphan),
                Bytes::from_static(b"orphan"),
            )
            .await
            .unwrap();

        assert_eq!(
            remote.list_versions(BuildType::Production).await.unwrap(),
            vec!["1.0.0"]
        );
    }
}
