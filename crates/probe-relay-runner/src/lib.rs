//! Probe-polling remote command runner.
//!
//! Provides:
//! - `Runner` - Executes one command against an indirect channel and polls
//!   for the probe file that signals completion
//! - `WrappedCommand` - Command/probe/log composition and validation
//! - `LocalArtifacts` - Local transcript and cursor bookkeeping

pub mod artifacts;
pub mod command;
pub mod runner;
mod session;

pub use artifacts::LocalArtifacts;
pub use command::{CommandError, WrappedCommand};
pub use runner::{Runner, RunnerError};
