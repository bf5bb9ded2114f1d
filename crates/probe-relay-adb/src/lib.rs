//! adb-backed remote channel.
//!
//! Provides:
//! - `AdbChannel` - `RemoteChannel` implementation driving `adb` subprocesses
//! - adb executable resolution across env overrides and SDK layouts

pub mod channel;
pub mod tooling;

pub use channel::{AdbChannel, TerminalApp};
pub use tooling::resolve_adb;
