//! Typed transcript messages.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a run, as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Queued but not yet dispatched.
    Pending,
    /// Wrapped command dispatched, settle delay in progress.
    Launching,
    /// Waiting for the probe, tailing the log.
    Polling,
    /// Probe observed, final artifacts being fetched.
    Draining,
    /// Run finished with a result code.
    Completed,
    /// Protocol-level abort (timeout or retry budget exhausted).
    Aborted,
    /// Channel failure before any result was produced.
    Failed,
}

/// One message in a run's transcript stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunMsg {
    /// A newly observed log line (combined stdout/stderr).
    Line { text: String },
    /// Lifecycle transition.
    Status { status: RunStatus },
    /// Final probe-derived result code.
    Result { code: i32 },
    /// No further messages will follow.
    Finished,
}

impl RunMsg {
    /// Approximate in-memory footprint, used for history eviction.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        match self {
            Self::Line { text } => text.len() + 16,
            Self::Status { .. } | Self::Result { .. } | Self::Finished => 16,
        }
    }
}
