use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use chunkferry_protocol::status::{Role, StatusSnapshot};

/// File name the sender snapshot is written under.
pub const SENDER_STATUS_FILE: &str = "sender_status.json";

/// File name the receiver snapshot is written under.
pub const RECEIVER_STATUS_FILE: &str = "receiver_status.json";

// ---------------------------------------------------------------------------
// StatusWriter
// ---------------------------------------------------------------------------

/// Writes the progress snapshot the monitoring dashboard reads.
///
/// The snapshot is overwritten atomically (temp file + rename) on
/// every state transition and at least once per chunk completion.
/// Writing is best-effort: a failed write is logged, never propagated
/// into the transfer itself.
pub struct StatusWriter {
    path: PathBuf,
    snapshot: Mutex<StatusSnapshot>,
}

impl StatusWriter {
    /// Creates a writer for `role` under `status_dir`.
    pub fn new(status_dir: &Path, role: Role) -> Self {
        let file = match role {
            Role::Sender => SENDER_STATUS_FILE,
            Role::Receiver => RECEIVER_STATUS_FILE,
        };
        Self {
            path: status_dir.join(file),
            snapshot: Mutex::new(StatusSnapshot::idle(role)),
        }
    }

    /// Applies `apply` to the snapshot, stamps it, and writes it out.
    pub fn update(&self, apply: impl FnOnce(&mut StatusSnapshot)) {
        let mut snapshot = self.snapshot.lock().unwrap();
        apply(&mut snapshot);
        snapshot.updated_at = chrono::Utc::now().to_rfc3339();
        if let Err(e) = write_atomic(&self.path, &snapshot) {
            warn!(path = %self.path.display(), error = %e, "status snapshot write failed");
        }
    }

    /// Resets to the idle snapshot (session end).
    pub fn reset(&self) {
        let role = self.snapshot.lock().unwrap().role;
        self.update(|s| *s = StatusSnapshot::idle(role));
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A copy of the current snapshot.
    pub fn current(&self) -> StatusSnapshot {
        self.snapshot.lock().unwrap().clone()
    }
}

fn write_atomic(path: &Path, snapshot: &StatusSnapshot) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    /// Creates a calculator with the given window and sample cap.
    pub fn new(window_size: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples,
                window_size,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window, or 0.0 with
    /// fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated seconds to transfer `remaining_bytes`, or `None` when
    /// the speed is unknown.
    pub fn eta_secs(&self, remaining_bytes: u64) -> Option<f64> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(remaining_bytes as f64 / speed)
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap();
        s.samples.clear();
    }
}
