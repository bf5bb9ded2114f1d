//! Injected capabilities: remote I/O and time.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

/// Channel error.
///
/// `Exit` carries the captured output of the failed tool invocation so
/// callers can surface it; everything else is opaque.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel tool not found: {0}")]
    ToolNotFound(String),
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel command exited with {status}: {stderr}")]
    Exit {
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("channel error: {0}")]
    Other(String),
}

/// Indirect, lossy channel to the remote execution environment.
///
/// There is no request/response pairing: `launch` is fire-and-forget, and
/// all feedback flows through files reached via the primitive operations.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Foreground the remote interactive session and inject literal text
    /// followed by a simulated enter keypress.
    ///
    /// Must be idempotent under repeated calls while the session is still
    /// becoming ready.
    ///
    /// # Errors
    /// Returns error if the injection could not be dispatched at all.
    async fn launch(&self, text: &str) -> Result<(), ChannelError>;

    /// Minimal recovery action against an unresponsive channel:
    /// re-foreground the session and press enter once.
    ///
    /// # Errors
    /// Returns error if the channel is unreachable.
    async fn resync(&self) -> Result<(), ChannelError>;

    /// Whether a remote path exists.
    ///
    /// # Errors
    /// Returns error if the check itself could not be performed.
    async fn exists(&self, path: &str) -> Result<bool, ChannelError>;

    /// Read a remote file as text.
    ///
    /// # Errors
    /// Returns error if the file is missing or unreadable.
    async fn read_to_string(&self, path: &str) -> Result<String, ChannelError>;

    /// Delete a remote file. Missing files are not an error.
    ///
    /// # Errors
    /// Returns error if the deletion could not be dispatched.
    async fn remove(&self, path: &str) -> Result<(), ChannelError>;

    /// Set permissions on a remote file (octal mode string, e.g. `"666"`).
    ///
    /// # Errors
    /// Returns error if the change could not be applied.
    async fn chmod(&self, path: &str, mode: &str) -> Result<(), ChannelError>;

    /// Copy a remote file into the local filesystem namespace.
    ///
    /// # Errors
    /// Returns error if the copy fails.
    async fn pull(&self, remote: &str, local: &Path) -> Result<(), ChannelError>;

    /// Copy a local file into the remote filesystem namespace.
    ///
    /// # Errors
    /// Returns error if the copy fails.
    async fn push(&self, local: &Path, remote: &str) -> Result<(), ChannelError>;
}

/// Injected time source so polling loops are testable without real delays.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Sleep for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
