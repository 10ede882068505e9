//! Local content-addressed chunk store.
//!
//! Chunks live at `{root}/{hash[0:2]}/{hash}`. Writes go through the
//! filesystem backend, so they are atomic and a repeated write of the same
//! hash is a no-op.

use crate::backends::filesystem::FilesystemBackend;
use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use depot_core::chunk::{ChunkHash, ChunkRef};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Default number of chunks read concurrently during reconstruction.
pub const DEFAULT_RECONSTRUCT_BATCH_SIZE: usize = 50;

/// Content-addressed chunk store on local disk.
#[derive(Debug)]
pub struct ChunkStore {
    backend: FilesystemBackend,
    batch_size: usize,
}

fn chunk_key(hash: &ChunkHash) -> String {
    format!("{}/{}", hash.shard(), hash.to_hex())
}

/// Hash chunk data off the async runtime.
async fn hash_of(data: Bytes) -> StorageResult<ChunkHash> {
    tokio::task::spawn_blocking(move || ChunkHash::compute(&data))
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))
}

impl ChunkStore {
    /// Open (creating if needed) a chunk store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self {
            backend: FilesystemBackend::new(root).await?,
            batch_size: DEFAULT_RECONSTRUCT_BATCH_SIZE,
        })
    }

    /// Set how many chunks [`ChunkStore::reconstruct`] reads at once.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    /// On-disk location of a chunk, whether or not it is stored.
    pub fn chunk_path(&self, hash: &ChunkHash) -> PathBuf {
        self.root().join(hash.shard()).join(hash.to_hex())
    }

    /// Store a chunk. Returns `true` if it was written, `false` if an intact
    /// copy was already stored.
    ///
    /// Data that does not hash to `hash` is rejected. A stored copy whose
    /// bytes differ is replaced.
    #[instrument(skip(self, data), fields(hash = %hash, size = data.len()))]
    pub async fn put(&self, hash: &ChunkHash, data: Bytes) -> StorageResult<bool> {
        let actual = hash_of(data.clone()).await?;
        if &actual != hash {
            return Err(StorageError::HashMismatch {
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let key = chunk_key(hash);
        match self.backend.get(&key).await {
            Ok(existing) if existing == data => return Ok(false),
            Ok(_) => warn!("replacing corrupt chunk in local store"),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.backend.put(&key, data).await?;
        Ok(true)
    }

    /// Read and verify a chunk.
    ///
    /// Returns `Ok(None)` when the chunk is not stored and
    /// `StorageError::HashMismatch` when the stored bytes are corrupt.
    #[instrument(skip(self), fields(hash = %hash))]
    pub async fn get(&self, hash: &ChunkHash) -> StorageResult<Option<Bytes>> {
        let data = match self.backend.get(&chunk_key(hash)).await {
            Ok(data) => data,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let actual = hash_of(data.clone()).await?;
        if &actual != hash {
            warn!(expected = %hash, actual = %actual, "corrupt chunk in local store");
            return Err(StorageError::HashMismatch {
                expected: hash.to_hex(),
                actual: actual.to_hex(),
            });
        }
        Ok(Some(data))
    }

    /// Check whether a chunk is stored without reading it.
    pub async fn exists(&self, hash: &ChunkHash) -> StorageResult<bool> {
        self.backend.exists(&chunk_key(hash)).await
    }

    /// Hashes of every stored chunk, sorted. Foreign files are ignored.
    pub async fn list(&self) -> StorageResult<Vec<ChunkHash>> {
        let mut hashes: Vec<ChunkHash> = self
            .backend
            .list("")
            .await?
            .iter()
            .filter_map(|key| {
                let (shard, name) = key.split_once('/')?;
                let hash = ChunkHash::from_hex(name).ok()?;
                (hash.shard() == shard).then_some(hash)
            })
            .collect();
        hashes.sort();
        Ok(hashes)
    }

    /// Delete every stored chunk not in `keep`. Returns the number removed.
    #[instrument(skip(self, keep), fields(keep = keep.len()))]
    pub async fn cleanup(&self, keep: &HashSet<ChunkHash>) -> StorageResult<u64> {
        let mut removed = 0;
        for hash in self.list().await? {
            if keep.contains(&hash) {
                continue;
            }
            match self.backend.delete(&chunk_key(&hash)).await {
                Ok(()) | Err(StorageError::NotFound(_)) => removed += 1,
                Err(e) => return Err(e),
            }
        }
        debug!(removed, "chunk store cleanup finished");
        Ok(removed)
    }

    async fn read_for_reconstruct(&self, chunk: &ChunkRef) -> StorageResult<Bytes> {
        let data = self
            .backend
            .get(&chunk_key(&chunk.hash))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => {
                    StorageError::NotFound(format!("chunk {}", chunk.hash))
                }
                other => other,
            })?;
        if data.len() as u64 != chunk.size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "chunk {} is {} bytes, expected {}",
                    chunk.hash,
                    data.len(),
                    chunk.size
                ),
            )));
        }
        Ok(data)
    }

    /// Write the chunks of one file to `dest` in ascending offset order.
    ///
    /// Reads run `batch_size` at a time in parallel; writes are sequential and
    /// wait on the sink. Chunks were verified when stored and are not
    /// re-hashed here. Returns the number of bytes written.
    #[instrument(skip(self, chunks, dest), fields(chunks = chunks.len()))]
    pub async fn reconstruct<W>(&self, chunks: &[ChunkRef], dest: &mut W) -> StorageResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut ordered: Vec<&ChunkRef> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.offset);

        let mut written = 0u64;
        for batch in ordered.chunks(self.batch_size) {
            let data = try_join_all(batch.iter().map(|c| self.read_for_reconstruct(c))).await?;
            for bytes in data {
                dest.write_all(&bytes).await?;
                written += bytes.len() as u64;
            }
        }
        dest.flush().await?;

        Ok(written)
    }
}
