//! Changeset computation between two manifest versions.

use crate::chunk::ChunkHash;
use crate::manifest::{FileEntry, Manifest, PackageManifest};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Files and chunks that differ between two versions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaReport {
    /// Files present only in the new manifest, sorted.
    pub new_files: Vec<String>,
    /// Files present in both whose content differs, sorted.
    pub changed_files: Vec<String>,
    /// Files present only in the old manifest, sorted. Informational only.
    pub deleted_files: Vec<String>,
    /// Chunks referenced by new or changed files that the old version lacks,
    /// in order of first appearance in the new manifest.
    pub chunks_to_upload: Vec<ChunkHash>,
    /// Derived counts for reporting.
    pub summary: DeltaSummary,
}

/// Aggregate counts derived from a [`DeltaReport`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaSummary {
    pub files_added: usize,
    pub files_changed: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub chunks_to_upload: usize,
    pub bytes_to_upload: u64,
}

impl DeltaReport {
    /// True when the new version adds no files, changes none and needs no chunks.
    pub fn is_empty(&self) -> bool {
        self.new_files.is_empty() && self.changed_files.is_empty() && self.chunks_to_upload.is_empty()
    }
}

fn file_changed(old: &FileEntry, new: &FileEntry) -> bool {
    old.total_size != new.total_size
        || old.chunks.len() != new.chunks.len()
        || !old.chunk_hashes().eq(new.chunk_hashes())
}

/// Compute the changeset needed to move from `old` to `new`.
///
/// Both manifests must belong to the same build type. Chunks already present
/// anywhere in `old` are never scheduled for upload, even when they reappear
/// in an unrelated file.
pub fn diff(old: &Manifest, new: &Manifest) -> crate::Result<DeltaReport> {
    if old.build_type != new.build_type {
        return Err(crate::Error::BuildTypeMismatch {
            old: old.build_type.to_string(),
            new: new.build_type.to_string(),
        });
    }

    let old_files: HashMap<&str, &FileEntry> =
        old.files.iter().map(|f| (f.filename.as_str(), f)).collect();
    let new_names: HashSet<&str> = new.files.iter().map(|f| f.filename.as_str()).collect();
    let old_chunks: HashSet<ChunkHash> = old.all_chunks().map(|c| c.hash).collect();

    let mut new_files = Vec::new();
    let mut changed_files = Vec::new();
    let mut files_unchanged = 0;
    let mut scheduled = HashSet::new();
    let mut chunks_to_upload = Vec::new();
    let mut bytes_to_upload = 0u64;

    for file in &new.files {
        match old_files.get(file.filename.as_str()) {
            None => new_files.push(file.filename.clone()),
            Some(previous) if file_changed(previous, file) => {
                changed_files.push(file.filename.clone())
            }
            Some(_) => {
                files_unchanged += 1;
                continue;
            }
        }

        for chunk in &file.chunks {
            if !old_chunks.contains(&chunk.hash) && scheduled.insert(chunk.hash) {
                chunks_to_upload.push(chunk.hash);
                bytes_to_upload += chunk.size;
            }
        }
    }

    let mut deleted_files: Vec<String> = old
        .files
        .iter()
        .filter(|f| !new_names.contains(f.filename.as_str()))
        .map(|f| f.filename.clone())
        .collect();

    new_files.sort();
    changed_files.sort();
    deleted_files.sort();

    let summary = DeltaSummary {
        files_added: new_files.len(),
        files_changed: changed_files.len(),
        files_deleted: deleted_files.len(),
        files_unchanged,
        chunks_to_upload: chunks_to_upload.len(),
        bytes_to_upload,
    };

    tracing::debug!(
        added = summary.files_added,
        changed = summary.files_changed,
        deleted = summary.files_deleted,
        chunks = summary.chunks_to_upload,
        "computed delta"
    );

    Ok(DeltaReport {
        new_files,
        changed_files,
        deleted_files,
        chunks_to_upload,
        summary,
    })
}

/// [`diff`] over parsed manifests of either format; legacy manifests are rejected.
pub fn diff_packages(old: &PackageManifest, new: &PackageManifest) -> crate::Result<DeltaReport> {
    diff(old.as_chunk_based()?, new.as_chunk_based()?)
}
