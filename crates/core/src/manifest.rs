//! Package manifests: versioned file-to-chunk mappings.
//!
//! A manifest is parsed in two passes. The raw JSON is first walked field by
//! field so the first structural problem can be reported with its path, then
//! the validated document is decoded into typed structures. The `manifestType`
//! tag decides once, at parse time, whether the document is chunk-based or a
//! legacy flat file list; an absent or unknown tag is rejected.

use crate::chunk::{ChunkHash, ChunkRef};
use crate::error::ManifestError;
use crate::hash::ContentHash;
use crate::layout;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Deployment track. Partitions the remote namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Production,
    Staging,
    Development,
}

impl BuildType {
    /// All known tracks.
    pub const ALL: [BuildType; 3] = [Self::Production, Self::Staging, Self::Development];

    /// Namespace segment for this track.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|bt| bt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidBuildType(s.to_string()))
    }
}

/// Manifest format discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestType {
    #[serde(rename = "chunk-based")]
    ChunkBased,
    #[serde(rename = "file-based")]
    LegacyFileBased,
}

impl ManifestType {
    /// Wire value of the `manifestType` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChunkBased => "chunk-based",
            Self::LegacyFileBased => "file-based",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "chunk-based" => Some(Self::ChunkBased),
            "file-based" => Some(Self::LegacyFileBased),
            _ => None,
        }
    }
}

impl fmt::Display for ManifestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strictly to validate a manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validation {
    /// Remote URLs optional; used for freshly packaged manifests.
    Lenient,
    /// Remote URLs required on every chunk; used for published manifests.
    Strict,
}

/// One source file within a package version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Slash-separated path relative to the package root.
    pub filename: String,
    /// File size in bytes; expected to equal the sum of chunk sizes.
    pub total_size: u64,
    /// Chunks in reconstruction (ascending offset) order.
    pub chunks: Vec<ChunkRef>,
}

impl FileEntry {
    /// Create an entry, normalizing the path and ordering chunks by offset.
    pub fn new(filename: impl Into<String>, mut chunks: Vec<ChunkRef>) -> Self {
        chunks.sort_by_key(|c| c.offset);
        let total_size = chunks.iter().map(|c| c.size).sum();
        Self {
            filename: normalize_filename(&filename.into()),
            total_size,
            chunks,
        }
    }

    /// Sum of the sizes of this file's chunks.
    pub fn chunk_size_sum(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// Ordered chunk hashes.
    pub fn chunk_hashes(&self) -> impl Iterator<Item = &ChunkHash> + '_ {
        self.chunks.iter().map(|c| &c.hash)
    }
}

/// Convert a relative path to forward-slash form without leading separators.
pub fn normalize_filename(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// A chunk-based package version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub version: String,
    pub build_type: BuildType,
    pub files: Vec<FileEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDocument<'a, F> {
    version: &'a str,
    build_type: BuildType,
    manifest_type: ManifestType,
    files: &'a [F],
}

impl Manifest {
    /// Create a chunk-based manifest.
    pub fn new(version: impl Into<String>, build_type: BuildType, files: Vec<FileEntry>) -> Self {
        Self {
            version: version.into(),
            build_type,
            files,
        }
    }

    /// Parse and validate a manifest that must be chunk-based.
    pub fn from_json(json: &str, validation: Validation) -> crate::Result<Self> {
        PackageManifest::parse(json, validation)?.into_chunk_based()
    }

    /// Serialize to pretty-printed JSON with the `chunk-based` tag.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(&ManifestDocument {
            version: &self.version,
            build_type: self.build_type,
            manifest_type: ManifestType::ChunkBased,
            files: &self.files,
        })
        .map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Look up a file by its normalized name.
    pub fn file(&self, filename: &str) -> Option<&FileEntry> {
        let filename = normalize_filename(filename);
        self.files.iter().find(|f| f.filename == filename)
    }

    /// Every chunk reference across all files, in file order.
    pub fn all_chunks(&self) -> impl Iterator<Item = &ChunkRef> + '_ {
        self.files.iter().flat_map(|f| f.chunks.iter())
    }

    /// Distinct chunk hashes in order of first appearance.
    pub fn unique_chunk_hashes(&self) -> Vec<ChunkHash> {
        let mut seen = HashSet::new();
        self.all_chunks()
            .filter(|c| seen.insert(c.hash))
            .map(|c| c.hash)
            .collect()
    }

    /// Total number of chunk references (duplicates included).
    pub fn chunk_count(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }

    /// Sum of declared file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.total_size).sum()
    }

    /// Remote key holding `chunk`.
    ///
    /// A chunk whose URL already names a chunk key of this track (for example
    /// one carried over from the version that first published it) stays
    /// there; every other chunk lives under this manifest's version.
    pub fn chunk_location(&self, chunk: &ChunkRef) -> String {
        if let Some(url) = &chunk.url
            && let Some((build_type, version, hash)) = layout::parse_chunk_key(url)
            && build_type == self.build_type
            && hash == chunk.hash
        {
            return layout::chunk_key(build_type, &version, &hash);
        }
        layout::chunk_key(self.build_type, &self.version, &chunk.hash)
    }

    /// Remote key for every distinct chunk, in order of first appearance.
    pub fn chunk_locations(&self) -> Vec<(ChunkHash, String)> {
        let mut seen = HashSet::new();
        self.all_chunks()
            .filter(|c| seen.insert(c.hash))
            .map(|c| (c.hash, self.chunk_location(c)))
            .collect()
    }

    /// Point chunks shared with `previous` at the location `previous` uses.
    ///
    /// Returns the number of chunk references updated.
    pub fn inherit_chunk_locations(&mut self, previous: &Manifest) -> usize {
        if previous.build_type != self.build_type {
            return 0;
        }
        let inherited: HashMap<ChunkHash, String> = previous
            .chunk_locations()
            .into_iter()
            .collect();
        let mut updated = 0;
        for chunk in self.files.iter_mut().flat_map(|f| f.chunks.iter_mut()) {
            if let Some(key) = inherited.get(&chunk.hash) {
                chunk.url = Some(key.clone());
                updated += 1;
            }
        }
        updated
    }

    /// Give chunks without a URL the location `published` records for them.
    ///
    /// Used when a locally packaged manifest stands in for the published
    /// copy of the same version. Returns the number of chunk references
    /// updated.
    pub fn fill_missing_chunk_locations(&mut self, published: &Manifest) -> usize {
        if published.build_type != self.build_type || published.version != self.version {
            return 0;
        }
        let known: HashMap<ChunkHash, String> = published.chunk_locations().into_iter().collect();
        let mut updated = 0;
        for chunk in self.files.iter_mut().flat_map(|f| f.chunks.iter_mut()) {
            if chunk.url.is_none()
                && let Some(key) = known.get(&chunk.hash)
            {
                chunk.url = Some(key.clone());
                updated += 1;
            }
        }
        updated
    }

    /// Set every chunk URL to the public form of its remote location.
    pub fn rewrite_chunk_urls(&mut self, public_base_url: Option<&str>) {
        let urls: Vec<String> = self
            .all_chunks()
            .map(|c| layout::chunk_url(public_base_url, &self.chunk_location(c)))
            .collect();
        for (chunk, url) in self
            .files
            .iter_mut()
            .flat_map(|f| f.chunks.iter_mut())
            .zip(urls)
        {
            chunk.url = Some(url);
        }
    }
}

/// One file of a legacy flat manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyFileEntry {
    pub filename: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A legacy manifest listing whole files rather than chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyManifest {
    pub version: String,
    pub build_type: BuildType,
    pub files: Vec<LegacyFileEntry>,
}

/// A parsed manifest of either format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PackageManifest {
    ChunkBased(Manifest),
    LegacyFileBased(LegacyManifest),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChunkFile {
    filename: String,
    #[serde(default)]
    total_size: Option<u64>,
    chunks: Vec<ChunkRef>,
}

#[derive(Deserialize)]
struct RawFiles<F> {
    files: Vec<F>,
}

impl PackageManifest {
    /// Parse and validate a manifest document of either format.
    pub fn parse(json: &str, validation: Validation) -> crate::Result<Self> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ManifestError::Syntax(e.to_string()))?;
        Self::from_value(value, validation)
    }

    /// Validate and decode an already-parsed JSON document.
    pub fn from_value(value: Value, validation: Validation) -> crate::Result<Self> {
        let header = validate_document(&value, validation)?;
        let decode_err = |e: serde_json::Error| ManifestError::Syntax(e.to_string());

        match header.manifest_type {
            ManifestType::ChunkBased => {
                let raw: RawFiles<RawChunkFile> =
                    serde_json::from_value(value).map_err(decode_err)?;
                let files = raw
                    .files
                    .into_iter()
                    .map(|f| {
                        let mut entry = FileEntry::new(f.filename, f.chunks);
                        if let Some(total_size) = f.total_size {
                            entry.total_size = total_size;
                        }
                        entry
                    })
                    .collect();
                Ok(Self::ChunkBased(Manifest::new(
                    header.version,
                    header.build_type,
                    files,
                )))
            }
            ManifestType::LegacyFileBased => {
                let raw: RawFiles<LegacyFileEntry> =
                    serde_json::from_value(value).map_err(decode_err)?;
                let files = raw
                    .files
                    .into_iter()
                    .map(|mut f| {
                        f.filename = normalize_filename(&f.filename);
                        f
                    })
                    .collect();
                Ok(Self::LegacyFileBased(LegacyManifest {
                    version: header.version,
                    build_type: header.build_type,
                    files,
                }))
            }
        }
    }

    /// Format discriminator.
    pub fn manifest_type(&self) -> ManifestType {
        match self {
            Self::ChunkBased(_) => ManifestType::ChunkBased,
            Self::LegacyFileBased(_) => ManifestType::LegacyFileBased,
        }
    }

    /// Version string.
    pub fn version(&self) -> &str {
        match self {
            Self::ChunkBased(m) => &m.version,
            Self::LegacyFileBased(m) => &m.version,
        }
    }

    /// Deployment track.
    pub fn build_type(&self) -> BuildType {
        match self {
            Self::ChunkBased(m) => m.build_type,
            Self::LegacyFileBased(m) => m.build_type,
        }
    }

    /// Borrow the chunk-based manifest, rejecting the legacy format.
    pub fn as_chunk_based(&self) -> crate::Result<&Manifest> {
        match self {
            Self::ChunkBased(m) => Ok(m),
            Self::LegacyFileBased(_) => Err(wrong_type()),
        }
    }

    /// Take the chunk-based manifest, rejecting the legacy format.
    pub fn into_chunk_based(self) -> crate::Result<Manifest> {
        match self {
            Self::ChunkBased(m) => Ok(m),
            Self::LegacyFileBased(_) => Err(wrong_type()),
        }
    }

    /// Serialize to pretty-printed JSON, preserving the format tag.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        match self {
            Self::ChunkBased(m) => m.to_json_pretty(),
            Self::LegacyFileBased(m) => serde_json::to_string_pretty(&ManifestDocument {
                version: &m.version,
                build_type: m.build_type,
                manifest_type: ManifestType::LegacyFileBased,
                files: &m.files,
            })
            .map_err(|e| crate::Error::Serialization(e.to_string())),
        }
    }
}

fn wrong_type() -> crate::Error {
    crate::Error::WrongManifestType {
        expected: ManifestType::ChunkBased.as_str(),
        found: ManifestType::LegacyFileBased.as_str(),
    }
}

struct DocumentHeader {
    version: String,
    build_type: BuildType,
    manifest_type: ManifestType,
}

fn missing(field: impl Into<String>) -> ManifestError {
    ManifestError::MissingField(field.into())
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ManifestError {
    ManifestError::InvalidField {
        field: field.into(),
        reason: reason.into(),
    }
}

fn require<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value, ManifestError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(missing(path)),
        Some(v) => Ok(v),
    }
}

fn require_str<'a>(obj: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a str, ManifestError> {
    let s = require(obj, key, path)?
        .as_str()
        .ok_or_else(|| invalid(path, "expected a string"))?;
    if s.is_empty() {
        return Err(invalid(path, "must not be empty"));
    }
    Ok(s)
}

fn require_u64(obj: &Map<String, Value>, key: &str, path: &str) -> Result<u64, ManifestError> {
    require(obj, key, path)?
        .as_u64()
        .ok_or_else(|| invalid(path, "expected a non-negative integer"))
}

fn require_hash(obj: &Map<String, Value>, key: &str, path: &str) -> Result<(), ManifestError> {
    let s = require_str(obj, key, path)?;
    ContentHash::from_hex(s)
        .map(|_| ())
        .map_err(|e| invalid(path, e.to_string()))
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ManifestError> {
    value
        .as_object()
        .ok_or_else(|| invalid(path, "expected an object"))
}

/// Check that `version` can be used as a single remote key segment.
///
/// Versions must be non-empty and must not contain `/`, `\` or `..`.
pub fn validate_version(version: &str) -> Result<(), ManifestError> {
    if version.is_empty() {
        return Err(invalid("version", "must not be empty"));
    }
    if version.contains(['/', '\\']) || version.contains("..") {
        return Err(invalid(
            "version",
            format!("`{version}` must not contain path separators or `..`"),
        ));
    }
    Ok(())
}

fn validate_document(value: &Value, validation: Validation) -> Result<DocumentHeader, ManifestError> {
    let root = as_object(value, "$")?;

    let version = require_str(root, "version", "version")?.to_string();
    validate_version(&version)?;
    let build_type = require_str(root, "buildType", "buildType")?
        .parse::<BuildType>()
        .map_err(|e| invalid("buildType", e.to_string()))?;
    let manifest_type = match root.get("manifestType") {
        None | Some(Value::Null) => {
            return Err(ManifestError::UnknownManifestType(
                "`manifestType` is missing".to_string(),
            ));
        }
        Some(Value::String(s)) => ManifestType::parse(s)
            .ok_or_else(|| ManifestError::UnknownManifestType(format!("`{s}`")))?,
        Some(other) => {
            return Err(ManifestError::UnknownManifestType(format!(
                "expected a string, got {other}"
            )));
        }
    };

    let files = require(root, "files", "files")?
        .as_array()
        .ok_or_else(|| invalid("files", "expected an array"))?;

    let mut seen = HashSet::new();
    for (i, file) in files.iter().enumerate() {
        let path = format!("files[{i}]");
        let file = as_object(file, &path)?;
        let filename = require_str(file, "filename", &format!("{path}.filename"))?;
        if !seen.insert(normalize_filename(filename)) {
            return Err(invalid(
                format!("{path}.filename"),
                format!("duplicate filename `{filename}`"),
            ));
        }

        match manifest_type {
            ManifestType::ChunkBased => validate_chunk_file(file, &path, filename, validation)?,
            ManifestType::LegacyFileBased => validate_legacy_file(file, &path, validation)?,
        }
    }

    Ok(DocumentHeader {
        version,
        build_type,
        manifest_type,
    })
}

fn validate_chunk_file(
    file: &Map<String, Value>,
    path: &str,
    filename: &str,
    validation: Validation,
) -> Result<(), ManifestError> {
    let chunks_path = format!("{path}.chunks");
    let chunks = require(file, "chunks", &chunks_path)?
        .as_array()
        .ok_or_else(|| invalid(&chunks_path, "expected an array"))?;

    let mut chunk_sum = 0u64;
    for (j, chunk) in chunks.iter().enumerate() {
        let cpath = format!("{chunks_path}[{j}]");
        let chunk = as_object(chunk, &cpath)?;
        require_hash(chunk, "hash", &format!("{cpath}.hash"))?;
        chunk_sum = chunk_sum.saturating_add(require_u64(chunk, "size", &format!("{cpath}.size"))?);
        require_u64(chunk, "offset", &format!("{cpath}.offset"))?;
        match chunk.get("url") {
            None | Some(Value::Null) if validation == Validation::Strict => {
                return Err(missing(format!("{cpath}.url")));
            }
            None | Some(Value::Null) => {}
            Some(_) => {
                require_str(chunk, "url", &format!("{cpath}.url"))?;
            }
        }
    }

    match file.get("totalSize") {
        None | Some(Value::Null) => {
            tracing::debug!(file = %filename, "manifest entry has no totalSize, using chunk sum");
        }
        Some(v) => {
            let total_size = v
                .as_u64()
                .ok_or_else(|| invalid(format!("{path}.totalSize"), "expected a non-negative integer"))?;
            if total_size != chunk_sum {
                tracing::warn!(
                    file = %filename,
                    total_size,
                    chunk_sum,
                    "manifest totalSize does not match sum of chunk sizes"
                );
            }
        }
    }

    Ok(())
}

fn validate_legacy_file(
    file: &Map<String, Value>,
    path: &str,
    validation: Validation,
) -> Result<(), ManifestError> {
    require_u64(file, "size", &format!("{path}.size"))?;
    if matches!(file.get("hash"), Some(v) if !v.is_null()) {
        require_hash(file, "hash", &format!("{path}.hash"))?;
    }
    if validation == Validation::Strict {
        require_str(file, "url", &format!("{path}.url"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(data: &[u8]) -> ChunkHash {
        ChunkHash::compute(data)
    }

    fn sample_manifest() -> Manifest {
        Manifest::new(
            "1.2.0",
            BuildType::Staging,
            vec![
                FileEntry::new(
                    "bin\\game.exe",
                    vec![
                        ChunkRef::new(hash(b"b"), 20, 10),
                        ChunkRef::new(hash(b"a"), 10, 0),
                    ],
                ),
                FileEntry::new("data/level.pak", vec![ChunkRef::new(hash(b"a"), 10, 0)]),
            ],
        )
    }

    fn chunk_json(url: Option<&str>) -> Value {
        let mut chunk = serde_json::json!({
            "hash": hash(b"a").to_hex(),
            "size": 10,
            "offset": 0,
        });
        if let Some(url) = url {
            chunk["url"] = Value::String(url.to_string());
        }
        chunk
    }

    fn document(chunk: Value) -> Value {
        serde_json::json!({
            "version": "1.0.0",
            "buildType": "production",
            "manifestType": "chunk-based",
            "files": [{ "filename": "a.bin", "totalSize": 10, "chunks": [chunk] }],
        })
    }

    fn manifest_error(value: Value, validation: Validation) -> ManifestError {
        match PackageManifest::from_value(value, validation) {
            Err(crate::Error::Manifest(e)) => e,
            other => panic!("expected manifest error, got {other:?}"),
        }
    }

    #[test]
    fn test_file_entry_normalizes_and_orders() {
        let manifest = sample_manifest();
        let exe = manifest.file("bin/game.exe").unwrap();
        assert_eq!(exe.filename, "bin/game.exe");
        assert_eq!(exe.total_size, 30);
        assert_eq!(exe.chunks[0].offset, 0);
        assert_eq!(exe.chunks[1].offset, 10);
    }

    #[test]
    fn test_unique_chunks_in_first_appearance_order() {
        let manifest = sample_manifest();
        assert_eq!(manifest.chunk_count(), 3);
        assert_eq!(manifest.unique_chunk_hashes(), vec![hash(b"a"), hash(b"b")]);
        assert_eq!(manifest.all_chunks().count(), 3);
    }

    #[test]
    fn test_json_roundtrip_with_tag() {
        let manifest = sample_manifest();
        let json = manifest.to_json_pretty().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["manifestType"], "chunk-based");
        assert_eq!(value["buildType"], "staging");
        assert_eq!(value["files"][0]["totalSize"], 30);

        let parsed = Manifest::from_json(&json, Validation::Lenient).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_strict_requires_urls() {
        let err = manifest_error(document(chunk_json(None)), Validation::Strict);
        assert_eq!(err, ManifestError::MissingField("files[0].chunks[0].url".to_string()));

        assert!(PackageManifest::from_value(document(chunk_json(None)), Validation::Lenient).is_ok());
        assert!(
            PackageManifest::from_value(document(chunk_json(Some("x/y"))), Validation::Strict)
                .is_ok()
        );
    }

    #[test]
    fn test_rewritten_manifest_passes_strict() {
        let mut manifest = sample_manifest();
        manifest.rewrite_chunk_urls(Some("https://cdn.example.com/"));
        let url = manifest.files[0].chunks[0].url.as_deref().unwrap();
        let h = hash(b"a").to_hex();
        assert_eq!(
            url,
            format!("https://cdn.example.com/staging/1.2.0/chunks/{}/{}", &h[..2], h)
        );
        let json = manifest.to_json_pretty().unwrap();
        assert!(Manifest::from_json(&json, Validation::Strict).is_ok());
    }

    #[test]
    fn test_inherited_locations_survive_rewrite() {
        let mut previous = sample_manifest();
        previous.version = "1.1.0".to_string();
        previous.rewrite_chunk_urls(Some("https://cdn.example.com"));

        let mut next = Manifest::new(
            "1.2.0",
            BuildType::Staging,
            vec![FileEntry::new(
                "data/level.pak",
                vec![
                    ChunkRef::new(hash(b"a"), 10, 0),
                    ChunkRef::new(hash(b"c"), 10, 10),
                ],
            )],
        );
        assert_eq!(next.inherit_chunk_locations(&previous), 1);
        next.rewrite_chunk_urls(None);

        let chunks = &next.files[0].chunks;
        assert_eq!(
            chunks[0].url.as_deref(),
            Some(layout::chunk_key(BuildType::Staging, "1.1.0", &hash(b"a")).as_str())
        );
        assert_eq!(
            chunks[1].url.as_deref(),
            Some(layout::chunk_key(BuildType::Staging, "1.2.0", &hash(b"c")).as_str())
        );

        let mut other_track = next.clone();
        other_track.build_type = BuildType::Production;
        assert_eq!(
            other_track.chunk_location(&chunks[0]),
            layout::chunk_key(BuildType::Production, "1.2.0", &hash(b"a"))
        );
    }

    #[test]
    fn test_local_copy_takes_published_locations() {
        let mut previous = sample_manifest();
        previous.version = "1.1.0".to_string();

        let packaged = Manifest::new(
            "1.2.0",
            BuildType::Staging,
            vec![FileEntry::new(
                "data/level.pak",
                vec![
                    ChunkRef::new(hash(b"a"), 10, 0),
                    ChunkRef::new(hash(b"c"), 10, 10),
                ],
            )],
        );
        let mut published = packaged.clone();
        published.inherit_chunk_locations(&previous);
        published.rewrite_chunk_urls(Some("https://cdn.example.com"));

        let mut local = packaged.clone();
        assert_eq!(local.fill_missing_chunk_locations(&published), 2);
        assert_eq!(local.chunk_locations(), published.chunk_locations());
        assert_eq!(
            local.chunk_location(&local.files[0].chunks[0]),
            layout::chunk_key(BuildType::Staging, "1.1.0", &hash(b"a"))
        );

        let mut other_version = packaged;
        other_version.version = "1.3.0".to_string();
        assert_eq!(other_version.fill_missing_chunk_locations(&published), 0);
    }

    #[test]
    fn test_first_structural_error_is_reported() {
        let mut doc = document(chunk_json(None));
        doc.as_object_mut().unwrap().remove("version");
        doc.as_object_mut().unwrap().remove("files");
        assert_eq!(
            manifest_error(doc, Validation::Lenient),
            ManifestError::MissingField("version".to_string())
        );

        let mut doc = document(chunk_json(None));
        doc.as_object_mut().unwrap().remove("files");
        assert_eq!(
            manifest_error(doc, Validation::Lenient),
            ManifestError::MissingField("files".to_string())
        );

        for field in ["hash", "size", "offset"] {
            let mut chunk = chunk_json(None);
            chunk.as_object_mut().unwrap().remove(field);
            assert_eq!(
                manifest_error(document(chunk), Validation::Lenient),
                ManifestError::MissingField(format!("files[0].chunks[0].{field}"))
            );
        }
    }

    #[test]
    fn test_invalid_hash_rejected() {
        let mut chunk = chunk_json(None);
        chunk["hash"] = Value::String("not-a-hash".to_string());
        assert!(matches!(
            manifest_error(document(chunk), Validation::Lenient),
            ManifestError::InvalidField { field, .. } if field == "files[0].chunks[0].hash"
        ));
    }

    #[test]
    fn test_version_must_be_a_single_key_segment() {
        for version in ["2.0/../../staging/9", "1.0/beta", "1.0\\beta", "..", ""] {
            let mut doc = document(chunk_json(None));
            doc["version"] = Value::String(version.to_string());
            assert!(
                matches!(
                    manifest_error(doc, Validation::Lenient),
                    ManifestError::InvalidField { field, .. } if field == "version"
                ),
                "version {version:?} should be rejected"
            );
        }

        assert!(validate_version("1.10.0-rc1").is_ok());
        assert!(validate_version("2024.06.01+build.7").is_ok());
    }

    #[test]
    fn test_total_size_mismatch_only_warns() {
        let mut doc = document(chunk_json(None));
        doc["files"][0]["totalSize"] = Value::from(999);
        let manifest = PackageManifest::from_value(doc, Validation::Lenient)
            .unwrap()
            .into_chunk_based()
            .unwrap();
        assert_eq!(manifest.files[0].total_size, 999);
        assert_eq!(manifest.files[0].chunk_size_sum(), 10);
    }

    #[test]
    fn test_duplicate_filenames_rejected() {
        let mut doc = document(chunk_json(None));
        let file = doc["files"][0].clone();
        doc["files"].as_array_mut().unwrap().push(file);
        assert!(matches!(
            manifest_error(doc, Validation::Lenient),
            ManifestError::InvalidField { field, .. } if field == "files[1].filename"
        ));
    }

    #[test]
    fn test_manifest_type_must_be_explicit() {
        let mut doc = document(chunk_json(None));
        doc.as_object_mut().unwrap().remove("manifestType");
        assert!(matches!(
            manifest_error(doc, Validation::Lenient),
            ManifestError::UnknownManifestType(_)
        ));

        let mut doc = document(chunk_json(None));
        doc["manifestType"] = Value::String("zip".to_string());
        assert!(matches!(
            manifest_error(doc, Validation::Lenient),
            ManifestError::UnknownManifestType(_)
        ));
    }

    #[test]
    fn test_legacy_manifest_parsed_and_rejected_for_chunk_ops() {
        let doc = serde_json::json!({
            "version": "0.9.0",
            "buildType": "production",
            "manifestType": "file-based",
            "files": [{ "filename": "game.exe", "size": 1234 }],
        });
        let parsed = PackageManifest::from_value(doc, Validation::Lenient).unwrap();
        assert_eq!(parsed.manifest_type(), ManifestType::LegacyFileBased);
        assert_eq!(parsed.version(), "0.9.0");
        assert!(matches!(
            parsed.as_chunk_based(),
            Err(crate::Error::WrongManifestType { .. })
        ));

        let json = parsed.to_json_pretty().unwrap();
        assert!(matches!(
            Manifest::from_json(&json, Validation::Lenient),
            Err(crate::Error::WrongManifestType { .. })
        ));
    }

    #[test]
    fn test_build_type_parsing() {
        assert_eq!("Production".parse::<BuildType>().unwrap(), BuildType::Production);
        assert!("nightly".parse::<BuildType>().is_err());
        assert_eq!(BuildType::Staging.to_string(), "staging");
    }
}
