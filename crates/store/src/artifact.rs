use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use chunkferry_codec::sha256_hex;
use chunkferry_protocol::manifest::{Manifest, validate_file_name};
use chunkferry_protocol::NONCE_LEN;

use crate::{MANIFEST_FILE, StoreError, chunk_file_name};

/// Chunk artifact directory for a single file.
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    /// Opens (creating if needed) the artifact directory for
    /// `file_name` under `root`. The name is validated before joining
    /// so a manifest cannot direct writes outside the root.
    pub fn open(root: &Path, file_name: &str) -> Result<Self, StoreError> {
        validate_file_name(file_name)?;
        let dir = root.join(format!("{file_name}.chunks"));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Uses an existing directory directly (sender-side staging).
    pub fn at(dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// The artifact directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists the manifest alongside the chunk artifacts.
    pub fn save_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let bytes = manifest.to_bytes()?;
        write_atomic(&self.dir.join(MANIFEST_FILE), &bytes)?;
        Ok(())
    }

    /// Loads and validates the persisted manifest.
    pub fn load_manifest(&self) -> Result<Manifest, StoreError> {
        let bytes = std::fs::read(self.dir.join(MANIFEST_FILE))?;
        Ok(Manifest::parse(&bytes)?)
    }

    /// Writes a chunk artifact (`[nonce][ciphertext]`).
    ///
    /// The write goes through a temp file and rename so a crash never
    /// leaves a plausible-looking partial artifact under the final
    /// name. Artifacts are written once and never mutated afterwards.
    pub fn write_chunk(
        &self,
        index: u32,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<(), StoreError> {
        let mut data = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        data.extend_from_slice(nonce);
        data.extend_from_slice(ciphertext);
        write_atomic(&self.dir.join(chunk_file_name(index)), &data)?;
        Ok(())
    }

    /// Reads a chunk artifact back as `(nonce, ciphertext)`.
    pub fn read_chunk(&self, index: u32) -> Result<([u8; NONCE_LEN], Vec<u8>), StoreError> {
        let path = self.dir.join(chunk_file_name(index));
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingChunk { index });
            }
            Err(e) => return Err(e.into()),
        };
        if data.len() < NONCE_LEN {
            return Err(StoreError::MissingChunk { index });
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[..NONCE_LEN]);
        Ok((nonce, data[NONCE_LEN..].to_vec()))
    }

    /// Returns `true` if the artifact for `index` exists and its
    /// ciphertext hashes to the manifest-recorded value.
    pub fn verify_chunk(&self, manifest: &Manifest, index: u32) -> bool {
        let Some(entry) = manifest.chunk(index) else {
            return false;
        };
        match self.read_chunk(index) {
            Ok((_, ciphertext)) => sha256_hex(&ciphertext) == entry.encrypted_hash,
            Err(_) => false,
        }
    }

    /// Re-derives the held set: the ascending indices whose artifacts
    /// exist on disk and still hash-match the manifest.
    ///
    /// Computed fresh on every connection attempt; this is the only
    /// resume state there is.
    pub fn held_set(&self, manifest: &Manifest) -> Vec<u32> {
        let mut held = Vec::new();
        for entry in &manifest.chunks {
            if self.verify_chunk(manifest, entry.index) {
                held.push(entry.index);
            } else if self.dir.join(chunk_file_name(entry.index)).exists() {
                // Present but failing verification: stale or corrupt,
                // will be overwritten by a fresh transfer.
                warn!(index = entry.index, "chunk artifact failed re-verification");
            }
        }
        debug!(
            held = held.len(),
            total = manifest.chunk_count,
            "held set derived"
        );
        held
    }

    /// Returns `true` when every chunk the manifest names verifies.
    pub fn is_complete(&self, manifest: &Manifest) -> bool {
        self.held_set(manifest).len() == manifest.chunks.len()
    }
}

/// Writes `data` to `path` via a temp file + rename.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)
}
