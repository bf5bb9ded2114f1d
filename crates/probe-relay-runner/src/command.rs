//! Command wrapping and probe/log path handling.

use probe_relay_core::{LOG_SUFFIX, PROBE_SUFFIX};
use thiserror::Error;

/// Command composition error.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("probe path must end with `{PROBE_SUFFIX}`: {0}")]
    InvalidProbePath(String),
    #[error("command is empty")]
    EmptyCommand,
}

/// Derive the log path for a probe path (same base name, `.log` suffix).
///
/// Returns `None` if the probe path does not carry the probe suffix.
#[must_use]
pub fn log_path_for(probe: &str) -> Option<String> {
    probe
        .strip_suffix(PROBE_SUFFIX)
        .map(|base| format!("{base}{LOG_SUFFIX}"))
}

/// A command prepared for dispatch through the remote launcher.
///
/// The wrapped text redirects combined output to the log path inside a
/// shell grouping, then writes the exit code to the probe path. The
/// grouping ensures a failure mid-command still reaches the redirection.
#[derive(Debug, Clone)]
pub struct WrappedCommand {
    command: String,
    probe: String,
    log: String,
    text: String,
}

impl WrappedCommand {
    /// Compose a wrapped command for the given probe path.
    ///
    /// With `debug`, the inner command is prefixed with `set -x` so the
    /// remote shell echoes each command into the log.
    ///
    /// # Errors
    /// Returns error if the command is blank or the probe path lacks the
    /// probe suffix.
    pub fn new(command: &str, probe: &str, debug: bool) -> Result<Self, CommandError> {
        if command.trim().is_empty() {
            return Err(CommandError::EmptyCommand);
        }
        let log = log_path_for(probe)
            .ok_or_else(|| CommandError::InvalidProbePath(probe.to_string()))?;

        let inner = if debug {
            format!("set -x; {command}")
        } else {
            command.to_string()
        };
        let text = format!("({inner}) > {log} 2>&1; echo $? > {probe}");

        Ok(Self {
            command: command.to_string(),
            probe: probe.to_string(),
            log,
            text,
        })
    }

    /// Original command text.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Remote probe path.
    #[must_use]
    pub fn probe(&self) -> &str {
        &self.probe
    }

    /// Remote log path.
    #[must_use]
    pub fn log(&self) -> &str {
        &self.log
    }

    /// Full text to inject into the remote session.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}
