use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::info;

use chunkferry_codec::{ChunkReader, TransferKey, encode_chunk};
use chunkferry_protocol::manifest::{Manifest, ManifestError, validate_file_name};
use chunkferry_protocol::Priority;

use crate::{ChunkStore, StoreError};

/// Splits, compresses, encrypts, and hashes `src` into `store`,
/// returning the manifest (also persisted into the store).
///
/// Chunks are staged as on-disk artifacts rather than kept in memory
/// so that a resumed attempt re-sends byte-identical ciphertext;
/// re-encrypting would change every nonce and invalidate the hashes
/// the manifest already promised.
pub fn prepare_file(
    src: &Path,
    store: &ChunkStore,
    chunk_size: u32,
    key: &TransferKey,
    priority: Priority,
    compression: bool,
    level: i32,
) -> Result<Manifest, StoreError> {
    let file_name = src
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StoreError::Manifest(ManifestError::InvalidFileName(src.display().to_string()))
        })?
        .to_string();
    validate_file_name(&file_name)?;

    let mut reader = ChunkReader::new(src, chunk_size)?;
    let mut file_hasher = Sha256::new();
    let mut entries = Vec::with_capacity(reader.chunk_count() as usize);

    while let Some((index, plain)) = reader.next_chunk()? {
        file_hasher.update(&plain);
        let encoded = encode_chunk(index, &plain, key, compression, level)?;
        store.write_chunk(index, &encoded.nonce, &encoded.ciphertext)?;
        entries.push(encoded.entry);
    }

    let manifest = Manifest::build(
        file_name,
        reader.file_size(),
        hex::encode(file_hasher.finalize()),
        reader.chunk_size(),
        priority,
        compression,
        entries,
    );
    store.save_manifest(&manifest)?;

    info!(
        file = %manifest.file_name,
        size = manifest.original_size,
        chunks = manifest.chunk_count,
        priority = %manifest.priority,
        "file prepared"
    );
    Ok(manifest)
}
