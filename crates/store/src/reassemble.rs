use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{error, info};

use chunkferry_codec::{TransferKey, decode_chunk, sha256_hex};
use chunkferry_protocol::manifest::Manifest;

use crate::{ChunkStore, StoreError};

/// Restores the original file from the store's chunk artifacts.
///
/// Runs two passes: first every artifact is checked against the
/// manifest (missing or corrupt chunks are each reported before the
/// call fails), then the chunks are decrypted, decompressed, and
/// written at `index * chunk_size`. The whole-file hash of the written
/// output is compared to the manifest; on mismatch the output is kept
/// and a `.invalid` marker is written next to it so the failure can be
/// inspected.
pub fn reassemble(
    store: &ChunkStore,
    manifest: &Manifest,
    key: &TransferKey,
    output: &Path,
) -> Result<(), StoreError> {
    // Pass 1: surface every bad chunk, not just the first.
    let mut missing = 0usize;
    let mut corrupt = 0usize;
    for entry in &manifest.chunks {
        match store.read_chunk(entry.index) {
            Ok((_, ciphertext)) => {
                if sha256_hex(&ciphertext) != entry.encrypted_hash {
                    error!(index = entry.index, "chunk ciphertext hash mismatch");
                    corrupt += 1;
                }
            }
            Err(StoreError::MissingChunk { index }) => {
                error!(index, "chunk artifact missing");
                missing += 1;
            }
            Err(e) => return Err(e),
        }
    }
    if missing > 0 || corrupt > 0 {
        return Err(StoreError::Reassembly { missing, corrupt });
    }

    // Pass 2: decode and write, hashing the output as it is produced.
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = std::fs::File::create(output)?;
    let mut file_hasher = Sha256::new();

    for entry in &manifest.chunks {
        let (nonce, ciphertext) = store.read_chunk(entry.index)?;
        let plain = decode_chunk(entry, &nonce, &ciphertext, key, manifest.compression)?;

        out.seek(SeekFrom::Start(
            u64::from(entry.index) * u64::from(manifest.chunk_size),
        ))?;
        out.write_all(&plain)?;
        file_hasher.update(&plain);
    }
    out.flush()?;

    let actual = hex::encode(file_hasher.finalize());
    if actual != manifest.original_hash {
        // Keep the output for inspection; flag it instead of deleting.
        let marker = invalid_marker_path(output);
        let _ = std::fs::write(
            &marker,
            format!(
                "expected {}\ncomputed {}\n",
                manifest.original_hash, actual
            ),
        );
        error!(
            file = %manifest.file_name,
            expected = %manifest.original_hash,
            computed = %actual,
            "restored file failed whole-file verification"
        );
        return Err(StoreError::FileHashMismatch {
            expected: manifest.original_hash.clone(),
            actual,
        });
    }

    // A stale marker from a previous failed attempt no longer applies.
    let _ = std::fs::remove_file(invalid_marker_path(output));

    info!(
        file = %manifest.file_name,
        size = manifest.original_size,
        chunks = manifest.chunk_count,
        "file restored and verified"
    );
    Ok(())
}

/// Path of the invalid-output marker for `output`.
pub fn invalid_marker_path(output: &Path) -> std::path::PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".invalid");
    output.with_file_name(name)
}
