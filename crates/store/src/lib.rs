//! On-disk chunk artifacts with hash-verified resume state.
//!
//! Both sides of a transfer use the same layout: a directory per file
//! holding `manifest.json` plus one `chunk_{index}.bin` artifact per
//! chunk (`[12-byte nonce][ciphertext]`). The sender stages prepared
//! chunks here so resumed attempts re-send byte-identical ciphertext;
//! the receiver persists verified chunks here and re-derives its
//! "already complete" set from the artifacts on every connection
//! attempt. File presence alone is never trusted: an artifact counts
//! only if its ciphertext still hashes to the manifest value.

mod artifact;
mod prepare;
mod reassemble;

pub use artifact::ChunkStore;
pub use prepare::prepare_file;
pub use reassemble::reassemble;

use chunkferry_codec::CodecError;
use chunkferry_protocol::manifest::ManifestError;

/// Manifest file name within a chunk directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Artifact file name for a chunk index.
pub fn chunk_file_name(index: u32) -> String {
    format!("chunk_{index}.bin")
}

/// Errors produced by the artifact store and reassembler.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("chunk {index} artifact missing")]
    MissingChunk { index: u32 },

    /// Reassembly aborted: per-chunk failures were already reported.
    #[error("reassembly failed: {missing} chunk(s) missing, {corrupt} corrupt")]
    Reassembly { missing: usize, corrupt: usize },

    /// Whole-file hash mismatch after reassembly. The output file is
    /// kept and flagged invalid for inspection.
    #[error("restored file hash mismatch: expected {expected}, got {actual}")]
    FileHashMismatch { expected: String, actual: String },
}
