//! Transfer session state machines.
//!
//! The sender drives `Connecting -> SendingManifest -> SendingChunks
//! -> AwaitingVerdict -> Completed`, with `Failed` reachable from any
//! non-terminal state; the receiver mirrors it. Resume needs no
//! sender-side bookkeeping: the manifest is re-sent on every attempt
//! and the receiver re-derives what it already holds by re-hashing its
//! persisted chunk artifacts.

mod progress;
mod receiver;
mod sender;

pub use progress::{SpeedCalculator, StatusWriter};
pub use receiver::ReceiverServer;
pub use sender::{JobReport, run_queue, send_job};

use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use chunkferry_codec::CodecError;
use chunkferry_protocol::frames::{read_frame, Frame, WireError};
use chunkferry_store::StoreError;

/// Session states shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    SendingManifest,
    SendingChunks,
    AwaitingVerdict,
    Completed,
    Failed,
}

impl SessionState {
    /// Snapshot-friendly state name.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::SendingManifest => "sending_manifest",
            SessionState::SendingChunks => "sending_chunks",
            SessionState::AwaitingVerdict => "awaiting_verdict",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

/// Errors produced by transfer sessions.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out during {stage}")]
    Timeout { stage: &'static str },

    #[error("chunk {index} not accepted after {attempts} attempt(s)")]
    ChunkExhausted { index: u32, attempts: u32 },

    #[error("receiver reported failure: {0}")]
    RemoteFailure(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("a session for {0} is already in progress")]
    FileBusy(String),

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    /// Whether a fresh connection attempt may succeed without changing
    /// the data. Integrity and structural failures return `false`:
    /// retrying them would resend the same bad bytes forever.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Io(_)
            | TransferError::Connect(_)
            | TransferError::Timeout { .. }
            | TransferError::ChunkExhausted { .. } => true,
            TransferError::Wire(WireError::Io(_)) => true,
            TransferError::Wire(_)
            | TransferError::Codec(_)
            | TransferError::Store(_)
            | TransferError::RemoteFailure(_)
            | TransferError::Protocol(_)
            | TransferError::FileBusy(_)
            | TransferError::Cancelled => false,
        }
    }
}

/// Reads one frame with a deadline, racing cancellation.
pub(crate) async fn read_timed<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
    wait: Duration,
    stage: &'static str,
    cancel: &CancellationToken,
) -> Result<Frame, TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = timeout(wait, read_frame(reader, max_payload)) => match result {
            Ok(frame) => Ok(frame?),
            Err(_) => Err(TransferError::Timeout { stage }),
        },
    }
}
