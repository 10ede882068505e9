//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Content-defined chunking bounds, in bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Chunks are never cut before this size (except the last one of a stream).
    #[serde(default = "default_min_chunk_size")]
    pub min_size: u64,
    /// Target average chunk size; determines the boundary mask.
    #[serde(default = "default_avg_chunk_size")]
    pub avg_size: u64,
    /// Chunks are always cut at this size.
    #[serde(default = "default_max_chunk_size")]
    pub max_size: u64,
}

fn default_min_chunk_size() -> u64 {
    crate::DEFAULT_MIN_CHUNK_SIZE
}

fn default_avg_chunk_size() -> u64 {
    crate::DEFAULT_AVG_CHUNK_SIZE
}

fn default_max_chunk_size() -> u64 {
    crate::DEFAULT_MAX_CHUNK_SIZE
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_chunk_size(),
            avg_size: default_avg_chunk_size(),
            max_size: default_max_chunk_size(),
        }
    }
}

impl ChunkerConfig {
    /// Boundary mask: `2^floor(log2(avg_size)) - 1`.
    ///
    /// Expects a validated configuration (`avg_size > 0`).
    pub fn mask(&self) -> u64 {
        (1u64 << self.avg_size.max(1).ilog2()) - 1
    }

    /// Validate that `0 < min_size <= avg_size <= max_size`.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_size == 0 {
            return Err("min_size must be greater than zero".to_string());
        }
        if self.min_size > self.avg_size || self.avg_size > self.max_size {
            return Err(format!(
                "chunk sizes must satisfy min <= avg <= max (got {} / {} / {})",
                self.min_size, self.avg_size, self.max_size
            ));
        }
        if usize::try_from(self.max_size).is_err() {
            return Err(format!(
                "max_size {} exceeds platform address space",
                self.max_size
            ));
        }
        Ok(())
    }
}

/// Remote storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage (useful for staging and tests).
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to the ambient AWS credential chain if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient AWS credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`), required by MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/remote"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err("s3 config requires a bucket".to_string());
                }
                match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                    (Some(_), Some(_)) | (None, None) => Ok(()),
                    _ => Err(
                        "s3 config requires both access_key_id and secret_access_key when either is set"
                            .to_string(),
                    ),
                }
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Local chunk cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the content-addressed chunk store.
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./data/chunks")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
        }
    }
}

/// Publishing behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Base URL prepended to remote keys when rewriting chunk URLs.
    /// When unset, chunk URLs are the bare remote keys.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Number of chunks read concurrently while reconstructing a file.
    #[serde(default = "default_reconstruct_batch_size")]
    pub reconstruct_batch_size: usize,
}

fn default_reconstruct_batch_size() -> usize {
    50
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            public_base_url: None,
            reconstruct_batch_size: default_reconstruct_batch_size(),
        }
    }
}

impl PublishConfig {
    /// Validate publishing settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.reconstruct_batch_size == 0 {
            return Err("publish.reconstruct_batch_size must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Local chunk store configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Chunking bounds.
    #[serde(default)]
    pub chunking: ChunkerConfig,
    /// Publishing behavior.
    #[serde(default)]
    pub publish: PublishConfig,
}

impl AppConfig {
    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.chunking
            .validate()
            .map_err(|e| format!("chunking: {e}"))?;
        self.publish.validate()
    }
}
