//! The probe-polling state machine.
//!
//! One invocation moves through `Launching -> Polling -> Draining` and ends
//! in `Completed` or `Aborted`. The remote side is fire-and-forget: the only
//! feedback is the log file (tailed incrementally) and the probe file whose
//! text content is the exit code.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use probe_relay_core::{Clock, RemoteChannel, RunConfig, RunStatus, TranscriptStore};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    artifacts::LocalArtifacts,
    command::{CommandError, WrappedCommand},
    session::RunSession,
};

/// Fixed settle time between dispatching the command and the first poll,
/// absorbing channel latency.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Mode applied to the remote probe and log before fetching them. The
/// remote environment may create them unreadable to the pulling user.
const NORMALIZE_MODE: &str = "666";

/// Runner error.
///
/// `TimedOut` and `RetriesExhausted` are protocol-level aborts: no
/// completion was detected, which is distinct from the command itself
/// exiting nonzero (that is reported through the returned code).
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("failed to dispatch command: {0}")]
    Launch(probe_relay_core::ChannelError),
    #[error("no completion detected within {waited}s")]
    TimedOut { waited: u64 },
    #[error("no completion detected and retry budget exhausted")]
    RetriesExhausted,
    #[error("local artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes single commands against an injected channel and clock.
pub struct Runner<C, K> {
    channel: Arc<C>,
    clock: K,
}

impl<C, K> Runner<C, K>
where
    C: RemoteChannel,
    K: Clock,
{
    /// Create a runner over a channel and a clock.
    pub const fn new(channel: Arc<C>, clock: K) -> Self {
        Self { channel, clock }
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> Arc<C> {
        Arc::clone(&self.channel)
    }

    /// Run one command to completion.
    ///
    /// Returns the probe-derived exit code of the remote command. Lines of
    /// the remote log are pushed to `store` incrementally, each exactly
    /// once, while the run is in flight.
    ///
    /// # Errors
    /// Returns error on a protocol-level abort (timeout, retry budget) or
    /// when dispatch/local bookkeeping fails outright.
    pub async fn run(
        &self,
        command: &str,
        probe: &str,
        config: &RunConfig,
        store: &TranscriptStore,
    ) -> Result<i32, RunnerError> {
        let result = self.run_inner(command, probe, config, store).await;
        if let Err(err) = &result {
            let status = match err {
                RunnerError::TimedOut { .. } | RunnerError::RetriesExhausted => RunStatus::Aborted,
                _ => RunStatus::Failed,
            };
            store.push_status(status);
            store.push_finished();
        }
        result
    }

    async fn run_inner(
        &self,
        command: &str,
        probe: &str,
        config: &RunConfig,
        store: &TranscriptStore,
    ) -> Result<i32, RunnerError> {
        let wrapped = WrappedCommand::new(command, probe, config.debug)?;
        let artifacts = LocalArtifacts::for_probe(probe, config.work_dir.as_deref());
        artifacts.ensure_dir().await?;
        let started = Instant::now();

        store.push_status(RunStatus::Launching);
        info!(probe, "dispatching remote command");
        self.channel
            .launch(wrapped.text())
            .await
            .map_err(RunnerError::Launch)?;
        self.clock.sleep(SETTLE_DELAY).await;

        store.push_status(RunStatus::Polling);
        let mut session = RunSession::new(config);
        let mut cursor = artifacts.read_cursor().await;

        while !self.probe_seen(&wrapped).await {
            self.normalize_permissions(&wrapped).await;

            if let Err(err) = self
                .channel
                .pull(wrapped.log(), artifacts.transcript())
                .await
            {
                debug!(%err, "log fetch failed");
                session.note_fetch_failure();
            }

            cursor = emit_new_lines(&artifacts, cursor, store, false).await?;

            if session.retries_exhausted() {
                error!(probe, "retry budget exhausted, aborting");
                return Err(RunnerError::RetriesExhausted);
            }
            if session.needs_recovery() {
                session.consume_retry();
                warn!(
                    probe,
                    remaining = session.retries_left(),
                    "channel stalled, attempting resync"
                );
                if let Err(err) = self.channel.resync().await {
                    debug!(%err, "resync failed");
                }
            }

            self.clock
                .sleep(Duration::from_secs(config.sleep_interval))
                .await;
            if session.tick(config.sleep_interval) {
                error!(probe, timeout = config.timeout, "timed out waiting for probe");
                return Err(RunnerError::TimedOut {
                    waited: config.timeout,
                });
            }
        }

        store.push_status(RunStatus::Draining);
        // The probe write may land before the files are fully visible.
        self.normalize_permissions(&wrapped).await;

        let code = match self.channel.read_to_string(wrapped.probe()).await {
            Ok(contents) => contents.trim().parse::<i32>().unwrap_or(0),
            Err(err) => {
                debug!(%err, "probe unreadable, treating as success");
                0
            }
        };
        let _ = self.channel.remove(wrapped.probe()).await;

        if let Err(err) = self
            .channel
            .pull(wrapped.log(), artifacts.transcript())
            .await
        {
            debug!(%err, "final log fetch failed");
        }
        let _ = emit_new_lines(&artifacts, cursor, store, true).await?;

        let elapsed = started.elapsed().as_secs();
        info!(
            command = wrapped.command(),
            elapsed_secs = elapsed,
            code,
            "remote command finished"
        );

        let _ = self.channel.remove(wrapped.log()).await;
        artifacts.cleanup(config.keep_log).await?;

        store.push_result(code);
        store.push_status(RunStatus::Completed);
        store.push_finished();
        Ok(code)
    }

    async fn probe_seen(&self, wrapped: &WrappedCommand) -> bool {
        self.channel
            .exists(wrapped.probe())
            .await
            .unwrap_or(false)
    }

    async fn normalize_permissions(&self, wrapped: &WrappedCommand) {
        let _ = self.channel.chmod(wrapped.probe(), NORMALIZE_MODE).await;
        let _ = self.channel.chmod(wrapped.log(), NORMALIZE_MODE).await;
    }
}

/// Emit transcript lines beyond `cursor` and persist the advanced cursor.
/// A missing local transcript leaves the cursor untouched.
///
/// A pull can race the remote writer and deliver a torn final fragment
/// with no trailing newline. While polling (`final_flush` false) that
/// fragment is held back so the completed line is emitted by a later
/// pull; at drain time the log is final and the tail is flushed as-is.
async fn emit_new_lines(
    artifacts: &LocalArtifacts,
    cursor: usize,
    store: &TranscriptStore,
    final_flush: bool,
) -> Result<usize, RunnerError> {
    let Ok(contents) = tokio::fs::read_to_string(artifacts.transcript()).await else {
        return Ok(cursor);
    };

    let mut lines: Vec<&str> = contents.lines().collect();
    if !final_flush && !contents.ends_with('\n') {
        lines.pop();
    }
    if lines.len() <= cursor {
        return Ok(cursor);
    }
    for line in &lines[cursor..] {
        store.push_line(*line);
    }
    let advanced = lines.len();
    artifacts.write_cursor(advanced).await?;
    Ok(advanced)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        path::{Path, PathBuf},
        sync::Mutex,
    };

    use async_trait::async_trait;
    use probe_relay_core::{ChannelError, RunMsg};

    use super::*;

    #[derive(Default)]
    struct FakeState {
        files: HashMap<String, String>,
        // Probe appears after this many negative existence checks.
        probe_after_polls: usize,
        probe_content: Option<String>,
        probe_unreadable: bool,
        exists_calls: usize,
        fail_pulls: bool,
        // When non-empty, successive pulls serve successive snapshots
        // (clamped to the last), simulating a log growing mid-run.
        log_snapshots: Vec<String>,
        pulls: usize,
        launches: Vec<String>,
        resyncs: usize,
        removed: Vec<String>,
    }

    struct FakeChannel {
        probe_path: String,
        state: Mutex<FakeState>,
    }

    impl FakeChannel {
        fn new(probe_path: &str, state: FakeState) -> Arc<Self> {
            Arc::new(Self {
                probe_path: probe_path.to_string(),
                state: Mutex::new(state),
            })
        }
    }

    #[async_trait]
    impl RemoteChannel for FakeChannel {
        async fn launch(&self, text: &str) -> Result<(), ChannelError> {
            self.state.lock().unwrap().launches.push(text.to_string());
            Ok(())
        }

        async fn resync(&self) -> Result<(), ChannelError> {
            self.state.lock().unwrap().resyncs += 1;
            Ok(())
        }

        async fn exists(&self, path: &str) -> Result<bool, ChannelError> {
            let mut state = self.state.lock().unwrap();
            if path == self.probe_path {
                state.exists_calls += 1;
                if let Some(content) = state.probe_content.clone() {
                    if state.exists_calls > state.probe_after_polls {
                        state.files.insert(self.probe_path.clone(), content);
                    }
                }
            }
            Ok(state.files.contains_key(path))
        }

        async fn read_to_string(&self, path: &str) -> Result<String, ChannelError> {
            let state = self.state.lock().unwrap();
            if state.probe_unreadable && path == self.probe_path {
                return Err(ChannelError::Other("permission denied".into()));
            }
            state
                .files
                .get(path)
                .cloned()
                .ok_or_else(|| ChannelError::Other(format!("no such file: {path}")))
        }

        async fn remove(&self, path: &str) -> Result<(), ChannelError> {
            let mut state = self.state.lock().unwrap();
            state.files.remove(path);
            state.removed.push(path.to_string());
            Ok(())
        }

        async fn chmod(&self, _path: &str, _mode: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn pull(&self, remote: &str, local: &Path) -> Result<(), ChannelError> {
            let content = {
                let mut state = self.state.lock().unwrap();
                if state.fail_pulls {
                    return Err(ChannelError::Other("device unresponsive".into()));
                }
                if state.log_snapshots.is_empty() {
                    state
                        .files
                        .get(remote)
                        .cloned()
                        .ok_or_else(|| ChannelError::Other(format!("no such file: {remote}")))?
                } else {
                    let idx = state.pulls.min(state.log_snapshots.len() - 1);
                    state.pulls += 1;
                    state.log_snapshots[idx].clone()
                }
            };
            tokio::fs::write(local, content).await?;
            Ok(())
        }

        async fn push(&self, local: &Path, remote: &str) -> Result<(), ChannelError> {
            let content = tokio::fs::read_to_string(local).await?;
            self.state
                .lock()
                .unwrap()
                .files
                .insert(remote.to_string(), content);
            Ok(())
        }
    }

    /// Clock that returns immediately and records requested sleeps.
    #[derive(Default)]
    struct InstantClock {
        slept: Mutex<Vec<Duration>>,
    }

    impl InstantClock {
        fn sleeps(&self) -> usize {
            self.slept.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Clock for InstantClock {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    const PROBE: &str = "/data/local/tmp/ci.probe";
    const LOG: &str = "/data/local/tmp/ci.log";

    fn temp_work_dir() -> PathBuf {
        std::env::temp_dir().join(format!("probe-relay-runner-{}", uuid::Uuid::new_v4()))
    }

    fn fast_config(dir: &Path) -> RunConfig {
        RunConfig::new()
            .with_sleep_interval(1)
            .with_work_dir(dir)
    }

    fn history_lines(store: &TranscriptStore) -> Vec<String> {
        store
            .get_history()
            .into_iter()
            .filter_map(|msg| match msg {
                RunMsg::Line { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    async fn cleanup_dir(dir: &Path) {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_probe_code_is_propagated() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), "done\n".to_string())]),
                probe_after_polls: 2,
                probe_content: Some("137".to_string()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(Arc::clone(&channel), InstantClock::default());
        let store = TranscriptStore::new();

        let code = runner
            .run("sleep 1; exit 137", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();
        assert_eq!(code, 137);

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_empty_probe_means_success() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), String::new())]),
                probe_content: Some(String::new()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let code = runner
            .run("true", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();
        assert_eq!(code, 0);

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_unreadable_probe_means_success() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), String::new())]),
                probe_content: Some("7".to_string()),
                probe_unreadable: true,
                ..FakeState::default()
            },
        );
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let code = runner
            .run("true", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();
        assert_eq!(code, 0);

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_lines_emitted_exactly_once_in_order() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), "line one\nline two\n".to_string())]),
                probe_after_polls: 3,
                probe_content: Some("0".to_string()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let code = runner
            .run("build", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();
        assert_eq!(code, 0);
        // Three polls plus the final drain all saw the same two lines;
        // the cursor guarantees each is shown once.
        assert_eq!(
            history_lines(&store),
            vec!["line one".to_string(), "line two".to_string()]
        );

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_growing_log_with_torn_tail_never_repeats_or_skips() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                // The first pull races the writer mid-"line two"; the last
                // snapshot ends without a newline to exercise the drain
                // flush as well.
                log_snapshots: vec![
                    "line one\nline tw".to_string(),
                    "line one\nline two\n".to_string(),
                    "line one\nline two\nline three".to_string(),
                ],
                probe_after_polls: 2,
                probe_content: Some("0".to_string()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let code = runner
            .run("build", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();
        assert_eq!(code, 0);
        // The torn fragment is never shown; the completed line is shown
        // exactly once by a later pull.
        assert_eq!(
            history_lines(&store),
            vec![
                "line one".to_string(),
                "line two".to_string(),
                "line three".to_string(),
            ]
        );

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_artifacts_are_cleaned_up_on_success() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), "out\n".to_string())]),
                probe_after_polls: 1,
                probe_content: Some("0".to_string()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(Arc::clone(&channel), InstantClock::default());
        let store = TranscriptStore::new();

        // Stale artifact from an earlier interrupted run against this name.
        let artifacts = LocalArtifacts::for_probe(PROBE, Some(&dir));
        artifacts.ensure_dir().await.unwrap();
        tokio::fs::write(artifacts.probe(), "1").await.unwrap();

        runner
            .run("build", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();

        {
            let state = channel.state.lock().unwrap();
            assert!(!state.files.contains_key(PROBE));
            assert!(!state.files.contains_key(LOG));
            assert!(state.removed.contains(&PROBE.to_string()));
            assert!(state.removed.contains(&LOG.to_string()));
        }
        assert!(!artifacts.transcript().exists());
        assert!(!artifacts.cursor().exists());
        assert!(!artifacts.probe().exists());

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_keep_log_retains_local_transcript() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), "kept\n".to_string())]),
                probe_content: Some("0".to_string()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let config = fast_config(&dir).with_keep_log(true);
        runner.run("build", PROBE, &config, &store).await.unwrap();

        let artifacts = LocalArtifacts::for_probe(PROBE, Some(&dir));
        let transcript = tokio::fs::read_to_string(artifacts.transcript())
            .await
            .unwrap();
        assert_eq!(transcript, "kept\n");
        assert!(!artifacts.cursor().exists());

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_timeout_aborts_with_protocol_failure() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), String::new())]),
                probe_content: None,
                ..FakeState::default()
            },
        );
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let config = fast_config(&dir).with_timeout(4).with_sleep_interval(2);
        let err = runner
            .run("spin", PROBE, &config, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::TimedOut { waited: 4 }));
        assert!(
            store
                .get_history()
                .iter()
                .any(|msg| matches!(msg, RunMsg::Status { status: RunStatus::Aborted }))
        );

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_persistent_fetch_failure_exhausts_retries_before_timeout() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                probe_content: None,
                fail_pulls: true,
                ..FakeState::default()
            },
        );
        let clock = Arc::new(InstantClock::default());
        let runner = Runner::new(Arc::clone(&channel), SharedClock(Arc::clone(&clock)));
        let store = TranscriptStore::new();

        let config = fast_config(&dir).with_timeout(1000).with_retries(1);
        let err = runner
            .run("spin", PROBE, &config, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::RetriesExhausted));

        {
            let state = channel.state.lock().unwrap();
            // One resync when the first three-failure streak landed.
            assert_eq!(state.resyncs, 1);
        }
        // Aborted long before the 1000s budget would have elapsed.
        assert!(clock.sleeps() < 20);

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_invalid_probe_suffix_is_rejected() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(PROBE, FakeState::default());
        let runner = Runner::new(channel, InstantClock::default());
        let store = TranscriptStore::new();

        let err = runner
            .run("build", "/tmp/ci.status", &fast_config(&dir), &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Command(CommandError::InvalidProbePath(_))
        ));

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_wrapped_command_is_dispatched_once() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), String::new())]),
                probe_content: Some("0".to_string()),
                ..FakeState::default()
            },
        );
        let runner = Runner::new(Arc::clone(&channel), InstantClock::default());
        let store = TranscriptStore::new();

        runner
            .run("make check", PROBE, &fast_config(&dir), &store)
            .await
            .unwrap();

        let state = channel.state.lock().unwrap();
        assert_eq!(
            state.launches,
            vec![format!("(make check) > {LOG} 2>&1; echo $? > {PROBE}")]
        );

        cleanup_dir(&dir).await;
    }

    #[tokio::test]
    async fn test_sleeps_follow_settle_then_interval() {
        let dir = temp_work_dir();
        let channel = FakeChannel::new(
            PROBE,
            FakeState {
                files: HashMap::from([(LOG.to_string(), String::new())]),
                probe_after_polls: 2,
                probe_content: Some("0".to_string()),
                ..FakeState::default()
            },
        );
        let clock = Arc::new(InstantClock::default());
        let runner = Runner::new(channel, SharedClock(Arc::clone(&clock)));
        let store = TranscriptStore::new();

        let config = fast_config(&dir).with_sleep_interval(5);
        runner.run("build", PROBE, &config, &store).await.unwrap();

        // Settle delay plus one sleep per negative poll.
        assert_eq!(clock.sleeps(), 3);
        let slept = clock.slept.lock().unwrap();
        assert_eq!(slept[0], SETTLE_DELAY);
        assert_eq!(slept[1], Duration::from_secs(5));

        cleanup_dir(&dir).await;
    }

    /// Clock wrapper so a test can keep a handle on the recorded sleeps.
    struct SharedClock(Arc<InstantClock>);

    #[async_trait]
    impl Clock for SharedClock {
        async fn sleep(&self, duration: Duration) {
            self.0.sleep(duration).await;
        }
    }
}
