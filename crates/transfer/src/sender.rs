//! Sender session: connects, negotiates the held set, streams chunks.

use std::collections::HashSet;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chunkferry_config::TransferConfig;
use chunkferry_protocol::frames::{write_frame, Frame};
use chunkferry_protocol::max_frame_len;
use chunkferry_protocol::Priority;
use chunkferry_sched::{JobQueue, JobState, TransferJob};
use chunkferry_store::ChunkStore;

use crate::progress::{SpeedCalculator, StatusWriter};
use crate::{read_timed, SessionState, TransferError};

/// Initial delay between job attempts; doubles per retry.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Outcome record for one job drained from the queue.
#[derive(Debug)]
pub struct JobReport {
    pub file_name: String,
    pub priority: Priority,
    /// Connection attempts consumed, including the successful one.
    pub attempts: u32,
    pub state: JobState,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }
}

/// Drains the queue in priority order, running each job to completion
/// or definitive failure before starting the next.
///
/// Retryable failures (connection loss, timeouts, exhausted chunk
/// retries) get up to `max_retries` attempts with doubling backoff;
/// the manifest is re-sent on every attempt, so a partially received
/// file resumes from the receiver's held set. Structural failures
/// (hash mismatches, protocol violations) fail the job immediately.
pub async fn run_queue(
    addr: &str,
    mut queue: JobQueue,
    config: &TransferConfig,
    status: &StatusWriter,
    cancel: &CancellationToken,
) -> Vec<JobReport> {
    let mut reports = Vec::new();

    while let Some(mut job) = queue.next_job() {
        if cancel.is_cancelled() {
            job.state = JobState::Failed("cancelled".into());
            reports.push(report_for(&job, 0));
            continue;
        }

        let max_attempts = config.transfer.max_retries.max(1);
        let mut backoff = RETRY_BACKOFF;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match send_job(addr, &mut job, config, status, cancel).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() && attempts < max_attempts && !cancel.is_cancelled() => {
                    warn!(
                        file = %job.manifest.file_name,
                        attempt = attempts,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "job attempt failed, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    error!(
                        file = %job.manifest.file_name,
                        attempts,
                        error = %e,
                        "job failed"
                    );
                    break;
                }
            }
        }

        reports.push(report_for(&job, attempts));
    }

    status.reset();
    reports
}

fn report_for(job: &TransferJob, attempts: u32) -> JobReport {
    JobReport {
        file_name: job.manifest.file_name.clone(),
        priority: job.priority(),
        attempts,
        state: job.state.clone(),
    }
}

/// Runs one sender session for `job` against `addr`.
///
/// The sender never touches the encryption key: chunks were staged
/// pre-encrypted by `prepare_file`, and resumed attempts re-send the
/// exact same ciphertext bytes. On success the job is marked
/// `Completed`; any error marks it `Failed` with the error text and is
/// also returned to the caller so retry policy can inspect it.
pub async fn send_job(
    addr: &str,
    job: &mut TransferJob,
    config: &TransferConfig,
    status: &StatusWriter,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    job.state = JobState::InProgress;
    let result = run_session(addr, job, config, status, cancel).await;

    match &result {
        Ok(()) => {
            job.state = JobState::Completed;
        }
        Err(e) => {
            job.state = JobState::Failed(e.to_string());
            let message = e.to_string();
            status.update(|s| {
                s.state = SessionState::Failed.name().into();
                s.error = Some(message);
            });
        }
    }
    result
}

async fn run_session(
    addr: &str,
    job: &TransferJob,
    config: &TransferConfig,
    status: &StatusWriter,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let manifest = &job.manifest;
    let total_bytes = manifest.total_encrypted_size();
    let max_payload = max_frame_len(manifest.chunk_size);

    status.update(|s| {
        s.state = SessionState::Connecting.name().into();
        s.current_file = Some(manifest.file_name.clone());
        s.chunks_done = 0;
        s.chunks_total = manifest.chunk_count;
        s.bytes_transferred = 0;
        s.total_bytes = total_bytes;
        s.speed_bps = 0.0;
        s.eta_secs = None;
        s.error = None;
    });

    let mut stream = connect(addr, config, cancel).await?;
    debug!(addr, file = %manifest.file_name, "connected");

    // Manifest exchange: send metadata, learn what the receiver holds.
    status.update(|s| s.state = SessionState::SendingManifest.name().into());
    write_frame(&mut stream, &Frame::Manifest(manifest.clone())).await?;

    let held = match read_timed(
        &mut stream,
        max_payload,
        config.ack_timeout(),
        "held set",
        cancel,
    )
    .await?
    {
        Frame::HeldSet(indices) => indices,
        other => {
            return Err(TransferError::Protocol(format!(
                "expected held set, got {:?}",
                other.frame_type()
            )));
        }
    };

    let held: HashSet<u32> = if config.transfer.enable_resume {
        held.into_iter().collect()
    } else {
        HashSet::new()
    };
    info!(
        file = %manifest.file_name,
        held = held.len(),
        total = manifest.chunk_count,
        "held set received"
    );

    // Chunk streaming, always in index order.
    status.update(|s| s.state = SessionState::SendingChunks.name().into());
    let store = ChunkStore::at(&job.chunk_dir)?;
    let speed = SpeedCalculator::default();
    let mut chunks_done = 0u32;
    let mut bytes_done = 0u64;

    for entry in &manifest.chunks {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        chunks_done += 1;
        bytes_done += u64::from(entry.encrypted_size);

        if held.contains(&entry.index) {
            debug!(index = entry.index, "receiver already holds chunk");
            status.update(|s| {
                s.chunks_done = chunks_done;
                s.bytes_transferred = bytes_done;
            });
            continue;
        }

        let (nonce, ciphertext) = store.read_chunk(entry.index)?;
        send_chunk(
            &mut stream,
            entry.index,
            &nonce,
            &ciphertext,
            max_payload,
            config,
            cancel,
        )
        .await?;

        speed.add_sample(u64::from(entry.encrypted_size));
        let speed_bps = speed.bytes_per_second();
        let eta = speed.eta_secs(total_bytes.saturating_sub(bytes_done));
        status.update(|s| {
            s.chunks_done = chunks_done;
            s.bytes_transferred = bytes_done;
            s.speed_bps = speed_bps;
            s.eta_secs = eta;
        });
    }

    // Whole-file verdict.
    status.update(|s| s.state = SessionState::AwaitingVerdict.name().into());
    match read_timed(
        &mut stream,
        max_payload,
        config.ack_timeout(),
        "final verdict",
        cancel,
    )
    .await?
    {
        Frame::FinalVerdict { success: true, .. } => {
            info!(file = %manifest.file_name, "receiver confirmed restoration");
            status.update(|s| {
                s.state = SessionState::Completed.name().into();
                s.eta_secs = Some(0.0);
            });
            Ok(())
        }
        Frame::FinalVerdict {
            success: false,
            expected_hash,
            computed_hash,
        } => Err(TransferError::RemoteFailure(format!(
            "file hash mismatch: expected {}, receiver computed {}",
            hex::encode(expected_hash),
            hex::encode(computed_hash)
        ))),
        other => Err(TransferError::Protocol(format!(
            "expected final verdict, got {:?}",
            other.frame_type()
        ))),
    }
}

async fn connect(
    addr: &str,
    config: &TransferConfig,
    cancel: &CancellationToken,
) -> Result<TcpStream, TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = timeout(config.connect_timeout(), TcpStream::connect(addr)) => match result {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TransferError::Connect(format!("{addr}: {e}"))),
            Err(_) => Err(TransferError::Timeout { stage: "connect" }),
        },
    }
}

/// Sends one chunk and waits for its acknowledgment, retrying on
/// rejection or ack timeout up to the configured bound.
///
/// An ack that timed out may still arrive after the chunk was re-sent,
/// leaving a duplicate queued on the stream. Acks for indices the
/// session has already moved past are skipped as stale duplicates, so
/// a merely late ack never desynchronizes the exchange.
async fn send_chunk(
    stream: &mut TcpStream,
    index: u32,
    nonce: &[u8; chunkferry_protocol::NONCE_LEN],
    ciphertext: &[u8],
    max_payload: usize,
    config: &TransferConfig,
    cancel: &CancellationToken,
) -> Result<(), TransferError> {
    let max_attempts = config.transfer.max_retries.max(1);

    for attempt in 1..=max_attempts {
        write_frame(
            stream,
            &Frame::Chunk {
                index,
                nonce: *nonce,
                ciphertext: ciphertext.to_vec(),
            },
        )
        .await?;

        // None means this attempt timed out and the chunk is re-sent.
        let verdict = loop {
            match read_timed(stream, max_payload, config.ack_timeout(), "chunk ack", cancel).await
            {
                Ok(Frame::ChunkAck {
                    index: acked,
                    accepted,
                }) => {
                    if acked == index {
                        break Some(accepted);
                    }
                    if acked < index {
                        // An index is only moved past once accepted, so
                        // an ack for it now is a leftover from a
                        // timed-out earlier send.
                        debug!(index, stale = acked, "skipping stale duplicate ack");
                        continue;
                    }
                    return Err(TransferError::Protocol(format!(
                        "ack for chunk {acked} while sending chunk {index}"
                    )));
                }
                Ok(other) => {
                    return Err(TransferError::Protocol(format!(
                        "expected chunk ack, got {:?}",
                        other.frame_type()
                    )));
                }
                Err(TransferError::Timeout { .. }) => {
                    warn!(index, attempt, "chunk ack timed out, re-sending");
                    break None;
                }
                Err(e) => return Err(e),
            }
        };

        match verdict {
            Some(true) => {
                debug!(index, attempt, "chunk accepted");
                return Ok(());
            }
            Some(false) => warn!(index, attempt, "chunk rejected, re-sending"),
            None => {}
        }
    }

    Err(TransferError::ChunkExhausted {
        index,
        attempts: max_attempts,
    })
}
