//! Remote key layout.
//!
//! ```text
//! {buildType}/roleplayai_manifest.json
//! {buildType}/{version}/manifest.json
//! {buildType}/{version}/version.json
//! {buildType}/{version}/chunks/{hash[0:2]}/{hash}
//! ```
//!
//! Other tooling reads these paths directly, so they must not change.

use crate::chunk::ChunkHash;
use crate::manifest::BuildType;

/// File name of the per-track latest pointer.
pub const LATEST_MANIFEST_FILE: &str = "roleplayai_manifest.json";
/// File name of a version-pinned manifest.
pub const MANIFEST_FILE: &str = "manifest.json";
/// File name of a version descriptor.
pub const VERSION_DESCRIPTOR_FILE: &str = "version.json";

/// Key of the latest manifest for a track.
pub fn latest_manifest_key(build_type: BuildType) -> String {
    format!("{build_type}/{LATEST_MANIFEST_FILE}")
}

/// Key of the immutable manifest for one version.
pub fn manifest_key(build_type: BuildType, version: &str) -> String {
    format!("{build_type}/{version}/{MANIFEST_FILE}")
}

/// Key of the descriptor for one version.
pub fn version_descriptor_key(build_type: BuildType, version: &str) -> String {
    format!("{build_type}/{version}/{VERSION_DESCRIPTOR_FILE}")
}

/// Key of a chunk within a version.
pub fn chunk_key(build_type: BuildType, version: &str, hash: &ChunkHash) -> String {
    format!("{build_type}/{version}/chunks/{}/{}", hash.shard(), hash.to_hex())
}

/// Parse a chunk key, or a URL ending in one, back into its parts.
///
/// Only the trailing `{buildType}/{version}/chunks/{hh}/{hash}` segments are
/// inspected, so any public base URL in front is ignored.
pub fn parse_chunk_key(location: &str) -> Option<(BuildType, String, ChunkHash)> {
    let mut segments = location.rsplit('/');
    let hash = ChunkHash::from_hex(segments.next()?).ok()?;
    let shard = segments.next()?;
    if segments.next()? != "chunks" || shard != hash.shard() {
        return None;
    }
    let version = segments.next()?;
    let build_type = segments.next()?.parse().ok()?;
    if version.is_empty() {
        return None;
    }
    Some((build_type, version.to_string(), hash))
}

/// Prefix under which every version of a track lives.
pub fn versions_prefix(build_type: BuildType) -> String {
    format!("{build_type}/")
}

/// Public URL for a key, or the bare key when no base URL is configured.
pub fn chunk_url(public_base_url: Option<&str>, key: &str) -> String {
    match public_base_url {
        Some(base) if !base.is_empty() => format!("{}/{key}", base.trim_end_matches('/')),
        _ => key.to_string(),
    }
}
