//! Core abstractions for probe-based remote command execution.
//!
//! This crate provides the fundamental building blocks:
//! - `RemoteChannel` / `Clock` - Injected capabilities for remote I/O and time
//! - `TranscriptStore` - Broadcast + history for incremental output tailing
//! - `RunMsg` - Typed transcript message enum
//! - `RunConfig` - Per-invocation budgets and options

pub mod config;
pub mod run_msg;
pub mod traits;
pub mod transcript;

pub use config::RunConfig;
pub use run_msg::{RunMsg, RunStatus};
pub use traits::{ChannelError, Clock, RemoteChannel, TokioClock};
pub use transcript::TranscriptStore;

/// Fixed suffix every probe path must carry.
pub const PROBE_SUFFIX: &str = ".probe";

/// Suffix of the log path derived from a probe path.
pub const LOG_SUFFIX: &str = ".log";
