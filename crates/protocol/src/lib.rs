//! Wire protocol types for chunkferry sender-receiver communication.
//!
//! The protocol is a single TCP connection carrying length-prefixed
//! binary frames. The sender opens the connection, transmits the
//! manifest, receives the set of chunks the receiver already holds,
//! then streams the missing chunks in index order. See [`frames`] for
//! the exact byte layout.

pub mod frames;
pub mod manifest;
pub mod priority;
pub mod status;

pub use frames::{Frame, FrameType, WireError, read_frame, write_frame};
pub use manifest::{ChunkEntry, Manifest, ManifestError, validate_file_name};
pub use priority::Priority;
pub use status::{Role, StatusSnapshot};

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// SHA-256 digest length in bytes.
pub const HASH_LEN: usize = 32;

/// Upper bound on a serialized manifest (frames larger than this are
/// rejected before allocation).
pub const MAX_MANIFEST_LEN: usize = 16 * 1024 * 1024;

/// Per-chunk frame overhead beyond the ciphertext: index, nonce, and
/// slack for compression expansion of incompressible input.
pub const CHUNK_FRAME_OVERHEAD: usize = 64 * 1024;

/// Maximum accepted frame payload for a session using `chunk_size`.
pub fn max_frame_len(chunk_size: u32) -> usize {
    MAX_MANIFEST_LEN.max(chunk_size as usize + CHUNK_FRAME_OVERHEAD)
}
