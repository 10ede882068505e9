//! Turn a build directory into stored chunks and a manifest.

use crate::error::{SyncError, SyncResult};
use async_stream::stream;
use depot_core::layout::{LATEST_MANIFEST_FILE, MANIFEST_FILE, VERSION_DESCRIPTOR_FILE};
use depot_core::manifest::{normalize_filename, validate_version};
use depot_core::progress::percent;
use depot_core::{
    BuildType, Chunk, Chunker, ChunkerConfig, FileEntry, Manifest, Progress, ProgressReporter,
    ProgressTracker,
};
use depot_storage::ChunkStore;
use futures::{Stream, StreamExt};
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

/// Chunks buffered between the chunking thread and the store writer.
const CHUNK_CHANNEL_DEPTH: usize = 4;

/// Directories holding per-user save data rather than shipped content.
const SAVE_DATA_DIRS: &[&str] = &["Saved", "SaveGames", "saves"];

/// Extensions of debug-symbol files.
const DEBUG_SYMBOL_EXTENSIONS: &[&str] = &["pdb", "debug", "sym", "dbg"];

/// Files published by a previous run that must never be packaged as content.
const PUBLISHED_ARTIFACTS: &[&str] = &[MANIFEST_FILE, VERSION_DESCRIPTOR_FILE, LATEST_MANIFEST_FILE];

/// What to package and how.
#[derive(Clone, Debug)]
pub struct PackageOptions {
    pub root: PathBuf,
    pub version: String,
    pub build_type: BuildType,
    pub chunking: ChunkerConfig,
    /// Skip `.pdb`, `.debug`, `.sym`, `.dbg` files and `.dSYM` bundles.
    pub exclude_debug_symbols: bool,
    /// Skip save-game directories.
    pub exclude_save_data: bool,
}

impl PackageOptions {
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>, build_type: BuildType) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
            build_type,
            chunking: ChunkerConfig::default(),
            exclude_debug_symbols: true,
            exclude_save_data: true,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkerConfig) -> Self {
        self.chunking = chunking;
        self
    }
}

/// Outcome of a packaging run.
#[derive(Clone, Debug)]
pub struct PackageReport {
    pub manifest: Manifest,
    pub file_count: usize,
    pub total_bytes: u64,
    /// Chunk references across all files.
    pub chunk_count: usize,
    /// Distinct chunks in the manifest.
    pub unique_chunks: usize,
    /// Chunks that were not already in the local store.
    pub chunks_written: usize,
    pub bytes_written: u64,
}

/// A regular file selected for packaging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the package root, `/`-separated.
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

fn is_debug_symbol(path: &Path) -> bool {
    let bundled = path.components().any(|c| match c {
        Component::Normal(name) => name
            .to_str()
            .is_some_and(|n| n.to_ascii_lowercase().ends_with(".dsym")),
        _ => false,
    });
    bundled
        || path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| {
                DEBUG_SYMBOL_EXTENSIONS
                    .iter()
                    .any(|d| ext.eq_ignore_ascii_case(d))
            })
}

fn in_save_dir(path: &Path) -> bool {
    let mut components = path.components().peekable();
    while let Some(component) = components.next() {
        // The last component is the file itself.
        if components.peek().is_none() {
            break;
        }
        if let Component::Normal(name) = component
            && SAVE_DATA_DIRS.iter().any(|d| name == *d)
        {
            return true;
        }
    }
    false
}

/// Whether a file at `relative` (to the package root) is left out.
pub fn is_excluded(relative: &Path, options: &PackageOptions) -> bool {
    let is_artifact = relative
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| PUBLISHED_ARTIFACTS.contains(&n));

    is_artifact
        || (options.exclude_debug_symbols && is_debug_symbol(relative))
        || (options.exclude_save_data && in_save_dir(relative))
}

/// List the files to package, sorted by name.
pub fn collect_files(options: &PackageOptions) -> SyncResult<Vec<SourceFile>> {
    let root = &options.root;
    if !root.is_dir() {
        return Err(SyncError::SourceMissing(root.clone()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            SyncError::Io {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if is_excluded(relative, options) {
            debug!(path = %relative.display(), "Skipping excluded file");
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|e| SyncError::Io {
                path: entry.path().to_path_buf(),
                source: e.into(),
            })?
            .len();
        files.push(SourceFile {
            name: normalize_filename(&relative.to_string_lossy()),
            path: entry.path().to_path_buf(),
            size,
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Chunk a file on a blocking thread, yielding chunks as they are cut.
fn chunk_file(path: PathBuf, chunker: Chunker) -> impl Stream<Item = SyncResult<Chunk>> {
    let (tx, mut rx) = mpsc::channel(CHUNK_CHANNEL_DEPTH);

    let producer = tokio::task::spawn_blocking(move || {
        let file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(source) => {
                let _ = tx.blocking_send(Err(SyncError::Io { path, source }));
                return;
            }
        };
        for chunk in chunker.chunks(file) {
            let item = chunk.map_err(|e| match e {
                depot_core::Error::Io(source) => SyncError::Io {
                    path: path.clone(),
                    source,
                },
                other => SyncError::Core(other),
            });
            let failed = item.is_err();
            if tx.blocking_send(item).is_err() || failed {
                break;
            }
        }
    });

    stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
        if let Err(e) = producer.await {
            yield Err(SyncError::from(e));
        }
    }
}

/// Chunk every selected file under `options.root` into `store` and build the
/// manifest describing them.
#[instrument(skip_all, fields(root = %options.root.display(), version = %options.version))]
pub async fn package(
    options: &PackageOptions,
    store: &ChunkStore,
    reporter: &dyn ProgressReporter,
) -> SyncResult<PackageReport> {
    validate_version(&options.version).map_err(depot_core::Error::from)?;
    let chunker = Chunker::new(options.chunking.clone())?;
    let tracker = ProgressTracker::new(reporter);

    let files = {
        let options = options.clone();
        tokio::task::spawn_blocking(move || collect_files(&options)).await??
    };
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();
    info!(files = files.len(), total_bytes, "Packaging build");
    tracker.report(Progress::new(0.0, format!("Packaging {} files", files.len())));

    let mut entries = Vec::with_capacity(files.len());
    let mut bytes_done = 0u64;
    let mut chunks_written = 0;
    let mut bytes_written = 0u64;

    for file in &files {
        let mut refs = Vec::new();
        let mut chunks = std::pin::pin!(chunk_file(file.path.clone(), chunker.clone()));
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if store.put(&chunk.hash, chunk.data.clone()).await? {
                chunks_written += 1;
                bytes_written += chunk.size();
            }
            bytes_done += chunk.size();
            refs.push(chunk.to_ref());
            tracker.report(Progress::new(
                percent(bytes_done, total_bytes),
                format!("Chunking {}", file.name),
            ));
        }
        debug!(file = %file.name, chunks = refs.len(), "Chunked file");
        entries.push(FileEntry::new(file.name.clone(), refs));
    }

    let manifest = Manifest::new(options.version.clone(), options.build_type, entries);
    let unique_chunks = manifest.unique_chunk_hashes().len();
    let report = PackageReport {
        file_count: files.len(),
        total_bytes,
        chunk_count: manifest.chunk_count(),
        unique_chunks,
        chunks_written,
        bytes_written,
        manifest,
    };

    info!(
        chunks = report.chunk_count,
        unique_chunks, chunks_written, bytes_written, "Packaging complete"
    );
    tracker.report(Progress::new(100.0, "Packaging complete"));
    Ok(report)
}
