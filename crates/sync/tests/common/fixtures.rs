use bytes::Bytes;
use depot_core::{BuildType, ChunkerConfig, Manifest};
use depot_storage::ChunkStore;
use depot_sync::{PackageOptions, package};
use std::path::Path;
use std::sync::Arc;

/// Small chunk bounds so test builds produce many chunks.
pub fn small_chunking() -> ChunkerConfig {
    ChunkerConfig {
        min_size: 256,
        avg_size: 1024,
        max_size: 4096,
    }
}

/// Deterministic pseudo-random bytes.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut state = seed;
    let data: Vec<u8> = (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect();
    Bytes::from(data)
}

pub fn write_file(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, data).unwrap();
}

/// A small build tree with a few shipped files.
pub fn write_build(root: &Path, seed: u64) {
    write_file(root, "bin/game.exe", &seeded_bytes(seed, 40 * 1024));
    write_file(root, "data/level1.pak", &seeded_bytes(seed + 1, 24 * 1024));
    write_file(root, "readme.txt", b"hello");
}

/// Package `root` into `store` with small chunks.
pub async fn package_dir(
    root: &Path,
    store: &ChunkStore,
    version: &str,
    build_type: BuildType,
) -> Manifest {
    let options = PackageOptions::new(root, version, build_type).with_chunking(small_chunking());
    package(&options, store, &depot_core::NoProgress)
        .await
        .unwrap()
        .manifest
}

pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub chunks: Arc<ChunkStore>,
}

impl Workspace {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let chunks = Arc::new(ChunkStore::open(dir.path().join("chunks")).await.unwrap());
        Self { dir, chunks }
    }

    pub fn build_dir(&self, name: &str) -> std::path::PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }
}
