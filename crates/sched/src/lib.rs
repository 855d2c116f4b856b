//! Priority scheduler for pending transfer jobs.
//!
//! Jobs are serviced in strict priority order (CRITICAL before HIGH
//! before NORMAL before LOW), FIFO within a tier. A job is never
//! preempted once handed out: the session runs it to completion or
//! definitive failure before the next job starts, so chunk streams of
//! different files are never interleaved on one connection. Priority
//! orders jobs only; chunks within a file always go out in index
//! order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::PathBuf;

use chunkferry_protocol::manifest::Manifest;
use chunkferry_protocol::Priority;

/// Lifecycle of a transfer job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InProgress,
    Completed,
    /// Definitive failure for this run, with a human-readable reason.
    /// A failed job stays eligible for a fresh attempt later.
    Failed(String),
}

/// A file queued for sending.
#[derive(Debug)]
pub struct TransferJob {
    pub manifest: Manifest,
    /// Directory holding the staged chunk artifacts.
    pub chunk_dir: PathBuf,
    pub state: JobState,
}

impl TransferJob {
    pub fn new(manifest: Manifest, chunk_dir: PathBuf) -> Self {
        Self {
            manifest,
            chunk_dir,
            state: JobState::Pending,
        }
    }

    pub fn priority(&self) -> Priority {
        self.manifest.priority
    }
}

struct QueuedJob {
    seq: u64,
    job: TransferJob,
}

impl QueuedJob {
    fn key(&self) -> (Priority, u64) {
        (self.job.priority(), self.seq)
    }
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for QueuedJob {}

impl Ord for QueuedJob {
    // BinaryHeap is a max-heap; reverse so the numerically lowest
    // priority (CRITICAL=1) with the lowest sequence pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory priority queue of pending transfer jobs.
#[derive(Default)]
pub struct JobQueue {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending job.
    pub fn enqueue(&mut self, job: TransferJob) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedJob { seq, job });
    }

    /// Hands out the highest-priority job, or `None` if empty.
    /// Ownership transfers to the caller for the duration of the
    /// attempt.
    pub fn next_job(&mut self) -> Option<TransferJob> {
        self.heap.pop().map(|q| q.job)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
