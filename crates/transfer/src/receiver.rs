//! Receiver server: accepts sessions, persists verified chunks,
//! reassembles completed files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chunkferry_codec::{decode_chunk, sha256_hex, CodecError, TransferKey};
use chunkferry_config::TransferConfig;
use chunkferry_protocol::frames::{write_frame, Frame};
use chunkferry_protocol::status::Role;
use chunkferry_protocol::{max_frame_len, Manifest, HASH_LEN};
use chunkferry_store::{reassemble, ChunkStore, StoreError};

use crate::progress::{SpeedCalculator, StatusWriter};
use crate::{read_timed, TransferError};

/// Accepts transfer sessions and restores files into the output
/// directory.
///
/// Chunk artifacts live under the staging root, one directory per
/// file, and survive across connections. A fresh attempt for a file
/// re-derives what is already held by re-hashing those artifacts, so a
/// killed connection costs only the chunk in flight.
pub struct ReceiverServer {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    output_dir: PathBuf,
    key: TransferKey,
    config: TransferConfig,
    status: StatusWriter,
    cancel: CancellationToken,
    /// File names with a session in flight. One transfer per file at
    /// a time; a second sender for the same file is turned away.
    active: Arc<Mutex<HashSet<String>>>,
}

impl ReceiverServer {
    pub fn new(root: &Path, output_dir: &Path, key: TransferKey, config: TransferConfig) -> Self {
        let status = StatusWriter::new(&config.monitoring.status_dir, Role::Receiver);
        Self {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                output_dir: output_dir.to_path_buf(),
                key,
                config,
                status,
                cancel: CancellationToken::new(),
                active: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    /// Token that stops the accept loop and all in-flight sessions.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Binds the configured listen address and serves until cancelled.
    pub async fn serve(&self) -> Result<(), TransferError> {
        let addr = format!(
            "{}:{}",
            self.inner.config.network.listen_host, self.inner.config.network.port
        );
        let listener = TcpListener::bind(&addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already-bound listener (lets tests bind port 0).
    pub async fn serve_on(&self, listener: TcpListener) -> Result<(), TransferError> {
        info!(addr = %listener.local_addr()?, "receiver listening");
        self.inner.status.reset();

        loop {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => {
                    info!("receiver shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    debug!(%peer, "connection accepted");
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        match handle_conn(&inner, stream).await {
                            Ok(()) => debug!(%peer, "session finished"),
                            Err(e) => warn!(%peer, error = %e, "session ended with error"),
                        }
                    });
                }
            }
        }
    }
}

/// Removes the file from the active set when the session ends,
/// however it ends.
struct FileGuard {
    active: Arc<Mutex<HashSet<String>>>,
    file_name: String,
}

impl FileGuard {
    fn acquire(active: &Arc<Mutex<HashSet<String>>>, file_name: &str) -> Option<Self> {
        if !active.lock().unwrap().insert(file_name.to_string()) {
            return None;
        }
        Some(Self {
            active: Arc::clone(active),
            file_name: file_name.to_string(),
        })
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.file_name);
    }
}

async fn handle_conn(inner: &Inner, mut stream: TcpStream) -> Result<(), TransferError> {
    let config = &inner.config;

    // The manifest must arrive first. A malformed manifest fails the
    // frame decode and drops the connection before any chunk exchange.
    let manifest = match read_timed(
        &mut stream,
        max_frame_len(config.transfer.chunk_size),
        config.ack_timeout(),
        "manifest",
        &inner.cancel,
    )
    .await?
    {
        Frame::Manifest(manifest) => manifest,
        other => {
            return Err(TransferError::Protocol(format!(
                "expected manifest, got {:?}",
                other.frame_type()
            )));
        }
    };
    info!(
        file = %manifest.file_name,
        size = manifest.original_size,
        chunks = manifest.chunk_count,
        priority = %manifest.priority,
        "manifest received"
    );

    let Some(_guard) = FileGuard::acquire(&inner.active, &manifest.file_name) else {
        warn!(file = %manifest.file_name, "rejecting concurrent session for same file");
        return Err(TransferError::FileBusy(manifest.file_name));
    };

    // The frame cap honors our own configuration, not the peer's
    // claim: a manifest declaring a huge chunk size must not let a
    // chunk frame demand an arbitrarily large allocation.
    let max_payload = max_frame_len(manifest.chunk_size.min(config.transfer.chunk_size));
    let store = ChunkStore::open(&inner.root, &manifest.file_name)?;
    store.save_manifest(&manifest)?;

    // Held set is re-derived from disk each attempt, never remembered.
    let held = if config.transfer.enable_resume {
        store.held_set(&manifest)
    } else {
        Vec::new()
    };
    write_frame(&mut stream, &Frame::HeldSet(held.clone())).await?;

    let mut have: HashSet<u32> = held.into_iter().collect();
    let total_bytes = manifest.total_encrypted_size();
    let mut bytes_done: u64 = manifest
        .chunks
        .iter()
        .filter(|e| have.contains(&e.index))
        .map(|e| u64::from(e.encrypted_size))
        .sum();
    let speed = SpeedCalculator::default();

    inner.status.update(|s| {
        s.state = "receiving_chunks".into();
        s.current_file = Some(manifest.file_name.clone());
        s.chunks_done = have.len() as u32;
        s.chunks_total = manifest.chunk_count;
        s.bytes_transferred = bytes_done;
        s.total_bytes = total_bytes;
        s.error = None;
    });

    let result = async {
        while (have.len() as u32) < manifest.chunk_count {
            let frame = read_timed(
                &mut stream,
                max_payload,
                config.ack_timeout(),
                "chunk",
                &inner.cancel,
            )
            .await?;

            let (index, nonce, ciphertext) = match frame {
                Frame::Chunk {
                    index,
                    nonce,
                    ciphertext,
                } => (index, nonce, ciphertext),
                other => {
                    return Err(TransferError::Protocol(format!(
                        "expected chunk, got {:?}",
                        other.frame_type()
                    )));
                }
            };
            let Some(entry) = manifest.chunk(index) else {
                return Err(TransferError::Protocol(format!(
                    "chunk {index} is not in the manifest"
                )));
            };

            // Verify before persisting; an artifact on disk implies it
            // already passed every check.
            let accepted = if sha256_hex(&ciphertext) != entry.encrypted_hash {
                warn!(index, "chunk ciphertext does not match manifest, rejecting");
                false
            } else {
                match decode_chunk(entry, &nonce, &ciphertext, &inner.key, manifest.compression) {
                    Ok(_) => {
                        store.write_chunk(index, &nonce, &ciphertext)?;
                        true
                    }
                    Err(
                        e @ (CodecError::Authentication { .. }
                        | CodecError::Integrity { .. }
                        | CodecError::LengthMismatch { .. }),
                    ) => {
                        warn!(index, error = %e, "chunk failed verification, rejecting");
                        false
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            write_frame(&mut stream, &Frame::ChunkAck { index, accepted }).await?;

            if accepted && have.insert(index) {
                bytes_done += u64::from(entry.encrypted_size);
                speed.add_sample(u64::from(entry.encrypted_size));
                let speed_bps = speed.bytes_per_second();
                let eta = speed.eta_secs(total_bytes.saturating_sub(bytes_done));
                let done = have.len() as u32;
                inner.status.update(|s| {
                    s.chunks_done = done;
                    s.bytes_transferred = bytes_done;
                    s.speed_bps = speed_bps;
                    s.eta_secs = eta;
                });
            }
        }

        // All chunks verified on disk; restore and report the verdict.
        inner.status.update(|s| s.state = "reassembling".into());
        let output = inner.output_dir.join(&manifest.file_name);
        match restore(&store, &manifest, &inner.key, &output).await {
            Ok(()) => {
                let expected = hash_from_hex(&manifest.original_hash)?;
                write_frame(
                    &mut stream,
                    &Frame::FinalVerdict {
                        success: true,
                        expected_hash: expected,
                        computed_hash: expected,
                    },
                )
                .await?;
                inner.status.update(|s| {
                    s.state = "completed".into();
                    s.eta_secs = Some(0.0);
                });
                Ok(())
            }
            Err(TransferError::Store(StoreError::FileHashMismatch { expected, actual })) => {
                error!(
                    file = %manifest.file_name,
                    expected = %expected,
                    computed = %actual,
                    "restored file rejected"
                );
                write_frame(
                    &mut stream,
                    &Frame::FinalVerdict {
                        success: false,
                        expected_hash: hash_from_hex(&expected)?,
                        computed_hash: hash_from_hex(&actual)?,
                    },
                )
                .await?;
                Err(TransferError::Store(StoreError::FileHashMismatch {
                    expected,
                    actual,
                }))
            }
            Err(e) => Err(e),
        }
    }
    .await;

    if let Err(e) = &result {
        let message = e.to_string();
        inner.status.update(|s| {
            s.state = "failed".into();
            s.error = Some(message);
        });
    }
    result
}

/// Runs the blocking reassembly off the async executor.
async fn restore(
    store: &ChunkStore,
    manifest: &Manifest,
    key: &TransferKey,
    output: &Path,
) -> Result<(), TransferError> {
    let dir = store.dir().to_path_buf();
    let manifest = manifest.clone();
    let key = key.clone();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let store = ChunkStore::at(&dir)?;
        reassemble(&store, &manifest, &key, &output)
    })
    .await
    .map_err(|e| TransferError::Io(std::io::Error::other(e)))??;
    Ok(())
}

fn hash_from_hex(s: &str) -> Result<[u8; HASH_LEN], TransferError> {
    let bytes = hex::decode(s)
        .map_err(|e| TransferError::Protocol(format!("invalid manifest hash: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| TransferError::Protocol("manifest hash has wrong length".into()))
}
