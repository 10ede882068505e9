//! Core domain types and shared logic for depot.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content hashes and chunk metadata
//! - Gear-hash content-defined chunking
//! - Manifest structure, validation and version descriptors
//! - Delta detection between manifest versions
//! - Remote key layout
//! - Upload session states and progress reporting

pub mod chunk;
pub mod chunker;
pub mod config;
pub mod delta;
pub mod descriptor;
pub mod error;
pub mod hash;
pub mod layout;
pub mod manifest;
pub mod progress;
pub mod upload;

pub use chunk::{Chunk, ChunkHash, ChunkRef};
pub use chunker::{Chunker, GearChunker, chunk_data};
pub use config::ChunkerConfig;
pub use delta::{DeltaReport, DeltaSummary, diff};
pub use descriptor::VersionDescriptor;
pub use error::{Error, ManifestError, Result};
pub use hash::{ContentHash, ContentHasher};
pub use manifest::{
    BuildType, FileEntry, LegacyFileEntry, LegacyManifest, Manifest, ManifestType,
    PackageManifest, Validation,
};
pub use progress::{
    ChunkOutcome, ChunkStatus, NoProgress, Progress, ProgressReporter, ProgressTracker, percent,
};
pub use upload::{SessionId, UploadState, UploadStats};

/// Default minimum chunk size: 5 MiB
pub const DEFAULT_MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Default average chunk size: 10 MiB
pub const DEFAULT_AVG_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default maximum chunk size: 20 MiB
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 20 * 1024 * 1024;
