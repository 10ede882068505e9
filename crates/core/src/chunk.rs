//! Chunk types and hashing.

use crate::hash::ContentHash;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A chunk hash (SHA-256 of chunk contents).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkHash(ContentHash);

impl ChunkHash {
    /// Create from a ContentHash.
    pub fn from_content_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Compute the hash of chunk data.
    pub fn compute(data: &[u8]) -> Self {
        Self(ContentHash::compute(data))
    }

    /// Get the underlying content hash.
    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        Ok(Self(ContentHash::from_hex(s)?))
    }

    /// Encode as hex string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// The two-character shard prefix used to bound directory fanout.
    pub fn shard(&self) -> String {
        format!("{:02x}", self.0.as_bytes()[0])
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A reference to a chunk from within a file entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// The chunk hash.
    pub hash: ChunkHash,
    /// Size in bytes.
    pub size: u64,
    /// Byte offset of the chunk within its owning file.
    pub offset: u64,
    /// Remote location, attached at upload time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ChunkRef {
    /// Create a chunk reference without a remote URL.
    pub fn new(hash: ChunkHash, size: u64, offset: u64) -> Self {
        Self {
            hash,
            size,
            offset,
            url: None,
        }
    }
}

/// A chunk with its data.
#[derive(Clone)]
pub struct Chunk {
    /// The chunk hash (computed from data).
    pub hash: ChunkHash,
    /// Byte offset within the source stream.
    pub offset: u64,
    /// The chunk data.
    pub data: Bytes,
}

impl Chunk {
    /// Create a new chunk from data, computing the hash.
    pub fn new(data: Bytes, offset: u64) -> Self {
        let hash = ChunkHash::compute(&data);
        Self { hash, offset, data }
    }

    /// Verify that the data matches the expected hash.
    pub fn verify(&self, expected: &ChunkHash) -> crate::Result<()> {
        if &self.hash != expected {
            return Err(crate::Error::HashMismatch {
                expected: expected.to_hex(),
                actual: self.hash.to_hex(),
            });
        }
        Ok(())
    }

    /// Get the chunk size.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Describe this chunk as a manifest reference.
    pub fn to_ref(&self) -> ChunkRef {
        ChunkRef::new(self.hash, self.size(), self.offset)
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("hash", &self.hash)
            .field("offset", &self.offset)
            .field("size", &self.data.len())
            .finish()
    }
}
