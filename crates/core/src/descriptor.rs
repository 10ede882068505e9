//! Version descriptor published next to each version manifest.

use crate::manifest::{BuildType, Manifest, ManifestType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Summary of a published version (`version.json`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDescriptor {
    pub version: String,
    pub build_type: BuildType,
    pub manifest_type: ManifestType,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    pub file_count: usize,
    /// Distinct chunks referenced by the version.
    pub chunk_count: usize,
    pub total_size: u64,
}

impl VersionDescriptor {
    /// Describe a chunk-based manifest published at `published_at`.
    pub fn for_manifest(manifest: &Manifest, published_at: OffsetDateTime) -> Self {
        Self {
            version: manifest.version.clone(),
            build_type: manifest.build_type,
            manifest_type: ManifestType::ChunkBased,
            published_at,
            file_count: manifest.files.len(),
            chunk_count: manifest.unique_chunk_hashes().len(),
            total_size: manifest.total_size(),
        }
    }

    pub fn to_json_pretty(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}
