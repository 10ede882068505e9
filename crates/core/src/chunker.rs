//! Content-defined chunking with a gear rolling hash.
//!
//! Boundaries depend only on the bytes since the previous boundary, so an edit
//! in the middle of a file perturbs the chunks around the edit and leaves the
//! rest of the chunk sequence intact.
//!
//! At each byte the rolling hash is updated as `hash = (hash << 1) + GEAR[byte]`.
//! A boundary is declared once the current chunk reaches `max_size`, or once it
//! is at least `min_size` long and `hash & mask == 0`. The hash is reset to zero
//! after every boundary.

use crate::chunk::{Chunk, ChunkRef};
use crate::config::ChunkerConfig;
use bytes::BytesMut;
use std::io::{self, Read};

/// Size of each read from the underlying source (64 KiB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Seed for the gear table generator. Changing it changes every chunk boundary.
const GEAR_SEED: u64 = 0x6765_6172_5f63_6463;

/// One step of the splitmix64 generator: returns the next state and its output.
const fn splitmix64(state: u64) -> (u64, u64) {
    let state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (state, z ^ (z >> 31))
}

const fn build_gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state = GEAR_SEED;
    let mut i = 0;
    while i < 256 {
        let (next, value) = splitmix64(state);
        state = next;
        table[i] = value;
        i += 1;
    }
    table
}

/// Fixed per-byte values mixed into the rolling hash.
pub static GEAR_TABLE: [u64; 256] = build_gear_table();

/// Boundary finder for a validated chunker configuration.
#[derive(Clone, Debug)]
pub struct Chunker {
    config: ChunkerConfig,
    mask: u64,
}

impl Chunker {
    /// Create a chunker, rejecting inconsistent size bounds.
    pub fn new(config: ChunkerConfig) -> crate::Result<Self> {
        config
            .validate()
            .map_err(crate::Error::InvalidChunkerConfig)?;
        let mask = config.mask();
        Ok(Self { config, mask })
    }

    /// The configuration this chunker was built with.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Find the length of the first chunk in `data`.
    ///
    /// Returns `None` when `data` is shorter than `max_size` and holds no
    /// content-defined boundary; the caller needs more input (or, at end of
    /// stream, emits everything that is left as the final chunk).
    pub fn cut_point(&self, data: &[u8]) -> Option<usize> {
        let min = self.config.min_size as usize;
        let max = self.config.max_size as usize;
        let end = data.len().min(max);

        // Bits older than 64 shifts fall off the hash, so hashing can begin
        // 64 bytes before the minimum size without changing any boundary.
        let start = min.saturating_sub(64).min(end);
        let mut hash = 0u64;
        for (i, &byte) in data[start..end].iter().enumerate() {
            hash = (hash << 1).wrapping_add(GEAR_TABLE[byte as usize]);
            let len = start + i + 1;
            if len >= min && hash & self.mask == 0 {
                return Some(len);
            }
        }

        if end == max { Some(max) } else { None }
    }

    /// Split a byte source into a lazy sequence of chunks.
    pub fn chunks<R: Read>(&self, reader: R) -> GearChunker<R> {
        GearChunker {
            reader,
            chunker: self.clone(),
            buffer: BytesMut::new(),
            scratch: vec![0u8; READ_BUFFER_SIZE],
            offset: 0,
            eof: false,
            failed: false,
        }
    }
}

/// Iterator over the chunks of a byte source.
///
/// Holds at most `max_size` bytes of unconsumed input. A read error is yielded
/// once and ends the sequence.
pub struct GearChunker<R> {
    reader: R,
    chunker: Chunker,
    buffer: BytesMut,
    scratch: Vec<u8>,
    offset: u64,
    eof: bool,
    failed: bool,
}

impl<R: Read> GearChunker<R> {
    /// Create an iterator over `reader` with the given configuration.
    pub fn new(reader: R, config: ChunkerConfig) -> crate::Result<Self> {
        Ok(Chunker::new(config)?.chunks(reader))
    }

    /// Bytes consumed from the source and emitted as chunks so far.
    pub fn position(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self) -> io::Result<()> {
        let max = self.chunker.config.max_size as usize;
        while self.buffer.len() < max && !self.eof {
            let want = (max - self.buffer.len()).min(self.scratch.len());
            match self.reader.read(&mut self.scratch[..want]) {
                Ok(0) => self.eof = true,
                Ok(n) => self.buffer.extend_from_slice(&self.scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for GearChunker<R> {
    type Item = crate::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(e) = self.fill() {
            self.failed = true;
            return Some(Err(e.into()));
        }
        if self.buffer.is_empty() {
            return None;
        }

        // fill() only leaves less than max_size buffered at end of stream.
        let cut = self
            .chunker
            .cut_point(&self.buffer)
            .unwrap_or(self.buffer.len());
        let data = self.buffer.split_to(cut).freeze();
        let chunk = Chunk::new(data, self.offset);
        self.offset += cut as u64;
        Some(Ok(chunk))
    }
}

/// Chunk an in-memory buffer and describe the result as manifest references.
pub fn chunk_data(data: &[u8], config: &ChunkerConfig) -> crate::Result<Vec<ChunkRef>> {
    Chunker::new(config.clone())?
        .chunks(data)
        .map(|chunk| chunk.map(|c| c.to_ref()))
        .collect()
}
