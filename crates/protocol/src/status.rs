//! Progress snapshot types consumed by the monitoring dashboard.
//!
//! The transfer core only ever exposes progress through these
//! records, serialized to JSON and periodically overwritten; the
//! dashboard never shares mutable state with a session.

use serde::{Deserialize, Serialize};

/// Which side of the transfer wrote the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

/// A point-in-time progress record for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub role: Role,
    /// Current session state name (e.g. "connecting", "sending_chunks").
    pub state: String,
    /// File currently being transferred, if any.
    pub current_file: Option<String>,
    pub chunks_done: u32,
    pub chunks_total: u32,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Current transfer speed, bytes per second.
    pub speed_bps: f64,
    /// Estimated seconds remaining, when the speed is known.
    pub eta_secs: Option<f64>,
    /// Human-readable failure reason, if the session failed.
    pub error: Option<String>,
    /// RFC 3339 timestamp of this snapshot.
    pub updated_at: String,
}

impl StatusSnapshot {
    /// An idle snapshot for `role` with no file in flight.
    pub fn idle(role: Role) -> Self {
        Self {
            role,
            state: match role {
                Role::Sender => "idle".into(),
                Role::Receiver => "waiting".into(),
            },
            current_file: None,
            chunks_done: 0,
            chunks_total: 0,
            bytes_transferred: 0,
            total_bytes: 0,
            speed_bps: 0.0,
            eta_secs: None,
            error: None,
            updated_at: String::new(),
        }
    }
}
