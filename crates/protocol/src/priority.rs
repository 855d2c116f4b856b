use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transfer priority. Lower numeric value is serviced first.
///
/// Serializes as the bare number (1-4) so manifests stay compatible
/// with tooling that reads the priority field numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
}

impl Priority {
    /// Human-readable name used in logs and status snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Normal => "NORMAL",
            Priority::Low => "LOW",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Critical),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Normal),
            4 => Ok(Priority::Low),
            other => Err(format!("invalid priority {other} (expected 1-4)")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p as u8
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "critical" => Ok(Priority::Critical),
            "2" | "high" => Ok(Priority::High),
            "3" | "normal" => Ok(Priority::Normal),
            "4" | "low" => Ok(Priority::Low),
            other => Err(format!("invalid priority '{other}'")),
        }
    }
}
