//! Chunk codec: pure transforms between original chunk bytes and the
//! compressed-then-encrypted form that travels on the wire.
//!
//! Every chunk is processed independently so any chunk can be restored
//! on its own. The forward path is compress -> encrypt -> hash; the
//! inverse checks the AEAD tag first, then the recorded hash of the
//! original bytes after decompression.

mod chunked;
mod key;
mod transform;

pub use chunked::ChunkReader;
pub use key::TransferKey;
pub use transform::{EncodedChunk, decode_chunk, encode_chunk};

use sha2::{Digest, Sha256};

/// Default chunk size: 1 MiB, matching the wire protocol's reference
/// configuration.
pub const DEFAULT_CHUNK_SIZE: u32 = 1024 * 1024;

/// Errors produced by the chunk codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// AEAD tag check failed. Treated as corruption; the chunk is
    /// re-requested, never silently accepted.
    #[error("authentication failed for chunk {index}")]
    Authentication { index: u32 },

    /// Decrypted and decompressed bytes do not hash to the value the
    /// manifest recorded for the original chunk.
    #[error("integrity check failed for chunk {index}: expected {expected}, got {actual}")]
    Integrity {
        index: u32,
        expected: String,
        actual: String,
    },

    #[error("chunk {index} decompressed to {actual} bytes, manifest says {expected}")]
    LengthMismatch {
        index: u32,
        expected: u32,
        actual: usize,
    },

    #[error("encryption failed for chunk {index}")]
    Encrypt { index: u32 },

    #[error("invalid key: {0}")]
    Key(String),
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file, streaming, and returns the
/// hex-encoded digest.
pub fn sha256_file(path: &std::path::Path) -> Result<String, CodecError> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
