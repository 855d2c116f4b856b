use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::RngCore;
use tracing::debug;

use chunkferry_protocol::manifest::ChunkEntry;
use chunkferry_protocol::NONCE_LEN;

use crate::{CodecError, TransferKey, sha256_hex};

/// One chunk in its on-wire form, with the manifest descriptor that
/// lets a receiver verify it.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// Per-chunk random nonce, stored alongside the ciphertext.
    pub nonce: [u8; NONCE_LEN],
    /// AES-128-GCM ciphertext over the (optionally compressed) chunk.
    pub ciphertext: Vec<u8>,
    /// Manifest descriptor for this chunk.
    pub entry: ChunkEntry,
}

/// Compresses, encrypts, and hashes one chunk of original bytes.
///
/// The nonce is freshly random for every call; a nonce is never reused
/// with the same key, even when the same file is prepared twice.
pub fn encode_chunk(
    index: u32,
    plain: &[u8],
    key: &TransferKey,
    compression: bool,
    level: i32,
) -> Result<EncodedChunk, CodecError> {
    let plain_hash = sha256_hex(plain);

    let payload = if compression {
        let compressed = zstd::stream::encode_all(plain, level)?;
        debug!(
            index,
            raw = plain.len(),
            compressed = compressed.len(),
            ratio = format!(
                "{:.1}%",
                (1.0 - compressed.len() as f64 / plain.len().max(1) as f64) * 100.0
            ),
            "chunk compressed"
        );
        compressed
    } else {
        plain.to_vec()
    };

    let cipher = Aes128Gcm::new(key.as_bytes().into());
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), payload.as_ref())
        .map_err(|_| CodecError::Encrypt { index })?;

    let entry = ChunkEntry {
        index,
        plain_size: plain.len() as u32,
        plain_hash,
        encrypted_size: ciphertext.len() as u32,
        encrypted_hash: sha256_hex(&ciphertext),
    };

    Ok(EncodedChunk {
        nonce,
        ciphertext,
        entry,
    })
}

/// Restores the original chunk bytes from an encoded chunk.
///
/// The AEAD tag is checked first ([`CodecError::Authentication`]);
/// only then are the decompressed bytes hashed and compared to the
/// manifest-recorded original hash ([`CodecError::Integrity`]).
pub fn decode_chunk(
    entry: &ChunkEntry,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    key: &TransferKey,
    compression: bool,
) -> Result<Vec<u8>, CodecError> {
    let cipher = Aes128Gcm::new(key.as_bytes().into());
    let payload = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CodecError::Authentication { index: entry.index })?;

    let plain = if compression {
        zstd::stream::decode_all(payload.as_slice())?
    } else {
        payload
    };

    if plain.len() != entry.plain_size as usize {
        return Err(CodecError::LengthMismatch {
            index: entry.index,
            expected: entry.plain_size,
            actual: plain.len(),
        });
    }

    let actual = sha256_hex(&plain);
    if actual != entry.plain_hash {
        return Err(CodecError::Integrity {
            index: entry.index,
            expected: entry.plain_hash.clone(),
            actual,
        });
    }

    Ok(plain)
}
