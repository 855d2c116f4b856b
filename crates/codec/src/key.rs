//! Shared symmetric key material.
//!
//! The key is distributed out-of-band; this module only loads and
//! re-encodes an already-available key. Nothing here generates or
//! transmits key material.

use std::path::Path;

use crate::CodecError;

/// Key length in bytes (AES-128).
pub const KEY_LEN: usize = 16;

/// A pre-shared AES-128 key.
#[derive(Clone)]
pub struct TransferKey([u8; KEY_LEN]);

impl TransferKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses a 32-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, CodecError> {
        let decoded = hex::decode(s.trim())
            .map_err(|e| CodecError::Key(format!("invalid hex: {e}")))?;
        let bytes: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|_| CodecError::Key(format!("expected {KEY_LEN} bytes")))?;
        Ok(Self(bytes))
    }

    /// Loads a hex-encoded key from `path` (trailing whitespace ignored).
    pub fn load(path: &Path) -> Result<Self, CodecError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_hex(&contents)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for TransferKey {
    // Never print key material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransferKey(..)")
    }
}
