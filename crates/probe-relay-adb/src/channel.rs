//! `RemoteChannel` implementation over adb subprocesses.

use std::{
    io,
    path::{Path, PathBuf},
    process::{Output, Stdio},
};

use async_trait::async_trait;
use probe_relay_core::{ChannelError, RemoteChannel};
use tokio::process::Command;
use tracing::debug;

use crate::tooling::resolve_adb;

/// Android keycode for enter.
const KEYCODE_ENTER: &str = "66";

/// The on-device terminal app whose foregrounded session receives the
/// injected text.
#[derive(Debug, Clone)]
pub struct TerminalApp {
    /// Activity component passed to `am start -n`.
    pub component: String,
}

impl Default for TerminalApp {
    fn default() -> Self {
        Self {
            component: "com.termux/com.termux.app.TermuxActivity".to_string(),
        }
    }
}

/// Channel to a device reachable over adb.
///
/// Commands are injected into the terminal app as keystrokes; files move
/// through `adb pull`/`adb push` and `adb shell` primitives.
pub struct AdbChannel {
    adb: PathBuf,
    serial: Option<String>,
    app: TerminalApp,
}

impl Default for AdbChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbChannel {
    /// Create a channel using the resolved adb executable and the default
    /// terminal app.
    #[must_use]
    pub fn new() -> Self {
        Self {
            adb: resolve_adb(),
            serial: None,
            app: TerminalApp::default(),
        }
    }

    /// Target a specific device serial (`adb -s`).
    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Use a specific adb executable.
    #[must_use]
    pub fn with_adb_path(mut self, adb: impl Into<PathBuf>) -> Self {
        self.adb = adb.into();
        self
    }

    /// Use a different terminal app.
    #[must_use]
    pub fn with_app(mut self, app: TerminalApp) -> Self {
        self.app = app;
        self
    }

    fn base_args(&self) -> Vec<String> {
        match &self.serial {
            Some(serial) => vec!["-s".to_string(), serial.clone()],
            None => Vec::new(),
        }
    }

    async fn output(&self, args: &[&str]) -> Result<Output, ChannelError> {
        let mut cmd = Command::new(&self.adb);
        cmd.args(self.base_args())
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(adb = %self.adb.display(), ?args, "spawning adb");
        cmd.output().await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ChannelError::ToolNotFound(self.adb.display().to_string())
            } else {
                ChannelError::Io(e)
            }
        })
    }

    async fn checked(&self, args: &[&str]) -> Result<Output, ChannelError> {
        let output = self.output(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(ChannelError::Exit {
                status: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        }
    }

    async fn foreground(&self) -> Result<(), ChannelError> {
        // `am start` on an already-foregrounded activity is a no-op, so
        // repeated calls while the session starts up are safe.
        self.checked(&["shell", "am", "start", "-n", &self.app.component])
            .await?;
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), ChannelError> {
        self.checked(&["shell", "input", "keyevent", KEYCODE_ENTER])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteChannel for AdbChannel {
    async fn launch(&self, text: &str) -> Result<(), ChannelError> {
        self.foreground().await?;
        if !text.is_empty() {
            let escaped = escape_input_text(text);
            let quoted = quote(&escaped)?;
            self.checked(&["shell", &format!("input text {quoted}")])
                .await?;
        }
        self.press_enter().await
    }

    async fn resync(&self) -> Result<(), ChannelError> {
        self.foreground().await?;
        self.press_enter().await
    }

    async fn exists(&self, path: &str) -> Result<bool, ChannelError> {
        // adb does not reliably propagate device-shell exit codes across
        // versions, so the answer travels as text.
        let probe = format!("test -e {} && echo 1 || echo 0", quote(path)?);
        let output = self.checked(&["shell", &probe]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim() == "1")
    }

    async fn read_to_string(&self, path: &str) -> Result<String, ChannelError> {
        let output = self
            .checked(&["shell", &format!("cat {}", quote(path)?)])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn remove(&self, path: &str) -> Result<(), ChannelError> {
        self.checked(&["shell", &format!("rm -f {}", quote(path)?)])
            .await?;
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: &str) -> Result<(), ChannelError> {
        self.checked(&["shell", &format!("chmod {mode} {}", quote(path)?)])
            .await?;
        Ok(())
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), ChannelError> {
        let local = local.to_string_lossy();
        self.checked(&["pull", remote, &local]).await?;
        Ok(())
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<(), ChannelError> {
        let local = local.to_string_lossy();
        self.checked(&["push", &local, remote]).await?;
        Ok(())
    }
}

/// Escape text for the on-device `input text` tool, which takes spaces as
/// `%s`. Everything else is left for shell quoting to protect.
fn escape_input_text(text: &str) -> String {
    text.replace(' ', "%s")
}

fn quote(text: &str) -> Result<String, ChannelError> {
    shlex::try_quote(text)
        .map(String::from)
        .map_err(|e| ChannelError::Other(format!("unquotable text: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spaces_become_percent_s() {
        assert_eq!(
            escape_input_text("cargo test --release"),
            "cargo%stest%s--release"
        );
    }

    #[test]
    fn test_quote_protects_shell_metacharacters() {
        let quoted = quote("(make) > ci.log 2>&1; echo $? > ci.probe").unwrap();
        assert!(quoted.starts_with('\'') || quoted.starts_with('"'));
    }

    #[test]
    fn test_serial_prepends_adb_args() {
        let channel = AdbChannel::new().with_serial("emulator-5554");
        assert_eq!(channel.base_args(), vec!["-s", "emulator-5554"]);

        let channel = AdbChannel::new();
        assert!(channel.base_args().is_empty());
    }

    #[test]
    fn test_default_app_is_termux() {
        let app = TerminalApp::default();
        assert!(app.component.starts_with("com.termux/"));
    }
}
