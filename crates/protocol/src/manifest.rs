//! Manifest model: per-file metadata describing the chunk layout and
//! the hashes everything else is verified against.
//!
//! The manifest is built once when a file is prepared and is read-only
//! afterwards. It is re-sent on every connection attempt, including
//! resumed ones, and is the single source of truth the receiver uses
//! to decide which chunks are still missing.

use serde::{Deserialize, Serialize};

use crate::priority::Priority;

/// Per-chunk descriptor carried in the manifest.
///
/// `plain_hash` covers the original chunk bytes (semantic integrity
/// after decrypt + decompress); `encrypted_hash` covers the ciphertext
/// as it travels on the wire (transport integrity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub index: u32,
    pub plain_size: u32,
    pub plain_hash: String,
    pub encrypted_size: u32,
    pub encrypted_hash: String,
}

/// Per-file transfer manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Original file name (bare name, no path components).
    pub file_name: String,
    /// Original file size in bytes.
    pub original_size: u64,
    /// SHA-256 hex digest over all original bytes.
    pub original_hash: String,
    /// Maximum chunk size used when splitting.
    pub chunk_size: u32,
    /// Declared chunk count; must match `chunks.len()`.
    pub chunk_count: u32,
    /// Transfer priority assigned at preparation time.
    pub priority: Priority,
    /// Whether chunk payloads are compressed before encryption.
    pub compression: bool,
    /// Ordered chunk descriptors, indices exactly `0..chunk_count`.
    pub chunks: Vec<ChunkEntry>,
}

/// Structural violations detected when parsing or validating a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("chunk size must be non-zero")]
    ZeroChunkSize,

    #[error("chunk count mismatch: declared {declared}, found {actual} descriptors")]
    ChunkCountMismatch { declared: u32, actual: usize },

    #[error("chunk indices out of order: expected {expected}, found {found}")]
    IndexOutOfOrder { expected: u32, found: u32 },

    #[error("declared sizes sum to {sum}, manifest says {declared}")]
    SizeSumMismatch { declared: u64, sum: u64 },

    #[error("chunk {index} is larger than the chunk size")]
    OversizedChunk { index: u32 },

    #[error("chunk {index} is short but not the final chunk")]
    ShortChunk { index: u32 },

    #[error("trailing empty chunk at index {index}")]
    EmptyChunk { index: u32 },

    #[error("chunk {index} carries a malformed hash")]
    InvalidChunkHash { index: u32 },

    #[error("malformed whole-file hash")]
    InvalidFileHash,
}

impl Manifest {
    /// Aggregates file metadata and chunk descriptors into a manifest.
    ///
    /// Pure aggregation; the result is expected to satisfy
    /// [`validate`](Self::validate) when the descriptors came from the
    /// codec.
    pub fn build(
        file_name: String,
        original_size: u64,
        original_hash: String,
        chunk_size: u32,
        priority: Priority,
        compression: bool,
        chunks: Vec<ChunkEntry>,
    ) -> Self {
        Self {
            file_name,
            original_size,
            original_hash,
            chunk_size,
            chunk_count: chunks.len() as u32,
            priority,
            compression,
            chunks,
        }
    }

    /// Parses and validates a manifest from JSON bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serializes the manifest to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Checks the structural invariants: safe file name, indices
    /// exactly `0..N` with no gaps or duplicates, declared sizes
    /// summing to the original size, non-final chunks exactly
    /// `chunk_size` long, and well-formed hashes.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_file_name(&self.file_name)?;

        if self.chunk_size == 0 {
            return Err(ManifestError::ZeroChunkSize);
        }

        if self.chunk_count as usize != self.chunks.len() {
            return Err(ManifestError::ChunkCountMismatch {
                declared: self.chunk_count,
                actual: self.chunks.len(),
            });
        }

        if !is_sha256_hex(&self.original_hash) {
            return Err(ManifestError::InvalidFileHash);
        }

        let last = self.chunks.len().saturating_sub(1);
        let mut sum: u64 = 0;
        for (pos, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != pos as u32 {
                return Err(ManifestError::IndexOutOfOrder {
                    expected: pos as u32,
                    found: chunk.index,
                });
            }
            if chunk.plain_size > self.chunk_size {
                return Err(ManifestError::OversizedChunk { index: chunk.index });
            }
            if chunk.plain_size == 0 {
                // An exact-multiple file emits no trailing empty chunk.
                return Err(ManifestError::EmptyChunk { index: chunk.index });
            }
            if pos != last && chunk.plain_size != self.chunk_size {
                return Err(ManifestError::ShortChunk { index: chunk.index });
            }
            if !is_sha256_hex(&chunk.plain_hash) || !is_sha256_hex(&chunk.encrypted_hash) {
                return Err(ManifestError::InvalidChunkHash { index: chunk.index });
            }
            sum += u64::from(chunk.plain_size);
        }

        if sum != self.original_size {
            return Err(ManifestError::SizeSumMismatch {
                declared: self.original_size,
                sum,
            });
        }

        Ok(())
    }

    /// Returns the descriptor for `index`, if present.
    pub fn chunk(&self, index: u32) -> Option<&ChunkEntry> {
        self.chunks.get(index as usize)
    }

    /// Total encrypted payload bytes across all chunks.
    pub fn total_encrypted_size(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| u64::from(c.encrypted_size))
            .sum()
    }
}

/// Validates a manifest file name: non-empty bare name with no path
/// components, so it can be joined under the store root safely.
pub fn validate_file_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidFileName("empty name".into()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ManifestError::InvalidFileName(format!(
            "path separator in name: {name}"
        )));
    }
    if name == "." || name == ".." {
        return Err(ManifestError::InvalidFileName(format!(
            "relative component not allowed: {name}"
        )));
    }
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(ManifestError::InvalidFileName(format!(
            "drive prefix not allowed: {name}"
        )));
    }
    Ok(())
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}
