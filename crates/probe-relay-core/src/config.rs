//! Per-invocation configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options and budgets for one remote command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Retain the local transcript copy after completion.
    #[serde(default)]
    pub keep_log: bool,

    /// Wrap the command with shell command echoing (`set -x`).
    #[serde(default)]
    pub debug: bool,

    /// Total seconds budget before the run is aborted.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Channel-unresponsiveness recovery attempts.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Seconds between polls.
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval: u64,

    /// Directory for local artifacts (transcript copy, cursor file).
    /// Defaults to the platform cache directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

const fn default_timeout() -> u64 {
    3600
}

const fn default_retries() -> u32 {
    3
}

const fn default_sleep_interval() -> u64 {
    5
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            keep_log: false,
            debug: false,
            timeout: default_timeout(),
            retries: default_retries(),
            sleep_interval: default_sleep_interval(),
            work_dir: None,
        }
    }
}

impl RunConfig {
    /// Create a config with default budgets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain the local transcript after completion.
    #[must_use]
    pub const fn with_keep_log(mut self, keep_log: bool) -> Self {
        self.keep_log = keep_log;
        self
    }

    /// Enable command echoing on the remote side.
    #[must_use]
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the total timeout budget in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the poll interval in seconds.
    #[must_use]
    pub const fn with_sleep_interval(mut self, sleep_interval: u64) -> Self {
        self.sleep_interval = sleep_interval;
        self
    }

    /// Set the local artifact directory.
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }
}
