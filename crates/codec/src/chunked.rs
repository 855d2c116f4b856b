use std::io::Read;
use std::path::Path;

use crate::{CodecError, DEFAULT_CHUNK_SIZE};

/// Reads a file as a sequence of fixed-size chunks.
///
/// Splitting is deterministic: chunk `i` covers bytes
/// `[i * chunk_size, (i + 1) * chunk_size)`; the final chunk carries
/// the remainder. A file whose size is an exact multiple of the chunk
/// size emits no trailing empty chunk, and an empty file emits no
/// chunks at all.
pub struct ChunkReader {
    file: std::fs::File,
    chunk_size: u32,
    next_index: u32,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(path: &Path, chunk_size: u32) -> Result<Self, CodecError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            chunk_size,
            next_index: 0,
            offset: 0,
            file_size,
        })
    }

    /// Reads the next chunk with its index. Returns `None` at EOF.
    pub fn next_chunk(&mut self) -> Result<Option<(u32, Vec<u8>)>, CodecError> {
        let remaining = self.file_size - self.offset;
        if remaining == 0 {
            return Ok(None);
        }

        let read_size = remaining.min(u64::from(self.chunk_size)) as usize;
        let mut buf = vec![0u8; read_size];
        self.file.read_exact(&mut buf)?;

        let index = self.next_index;
        self.next_index += 1;
        self.offset += read_size as u64;
        Ok(Some((index, buf)))
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Effective chunk size.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Number of chunks this file splits into.
    pub fn chunk_count(&self) -> u32 {
        self.file_size.div_ceil(u64::from(self.chunk_size)) as u32
    }
}
