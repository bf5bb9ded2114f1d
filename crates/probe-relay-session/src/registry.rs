//! Run orchestration with a per-probe overlap guard.

use std::{collections::HashMap, path::Path, sync::Arc};

use probe_relay_core::{
    ChannelError, Clock, RemoteChannel, RunConfig, RunMsg, RunStatus, TranscriptStore,
};
use probe_relay_runner::{
    CommandError, LocalArtifacts, Runner, RunnerError, command::log_path_for,
};
use tokio::sync::RwLock;
use tracing::info;

use crate::store::{RunFilter, RunId, RunRecord, RunStore, StoreError};

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a run is already in flight for probe {0}")]
    AlreadyRunning(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("local artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished run.
#[derive(Debug, Clone, Copy)]
pub struct CompletedRun {
    /// Record identifier in the run store.
    pub id: RunId,
    /// Probe-derived exit code.
    pub code: i32,
}

/// Orchestrates runs over one channel, enforcing the invariant that at
/// most one command is in flight against a given probe path.
pub struct RunRegistry<C, K, S>
where
    C: RemoteChannel,
    K: Clock,
    S: RunStore + 'static,
{
    runner: Runner<C, K>,
    store: Arc<S>,
    active: RwLock<HashMap<String, Arc<TranscriptStore>>>,
}

impl<C, K, S> RunRegistry<C, K, S>
where
    C: RemoteChannel,
    K: Clock,
    S: RunStore + 'static,
{
    /// Create a registry over a runner and a store.
    pub fn new(runner: Runner<C, K>, store: S) -> Self {
        Self {
            runner,
            store: Arc::new(store),
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Run a command to completion, recording it in the store.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if the probe path has an in-flight run;
    /// otherwise propagates runner and storage failures. A protocol-level
    /// abort leaves the record in `Aborted` status.
    pub async fn start_run(
        &self,
        command: &str,
        probe: &str,
        config: &RunConfig,
    ) -> Result<CompletedRun, RegistryError> {
        let transcript = Arc::new(TranscriptStore::new());
        {
            let mut active = self.active.write().await;
            if active.contains_key(probe) {
                return Err(RegistryError::AlreadyRunning(probe.to_string()));
            }
            active.insert(probe.to_string(), Arc::clone(&transcript));
        }

        let result = self.execute(command, probe, config, &transcript).await;
        self.active.write().await.remove(probe);
        result
    }

    async fn execute(
        &self,
        command: &str,
        probe: &str,
        config: &RunConfig,
        transcript: &TranscriptStore,
    ) -> Result<CompletedRun, RegistryError> {
        let id = self.store.create(command, probe).await?;
        self.store.update_status(id, RunStatus::Launching).await?;

        // Mirror the runner's in-flight transitions into the record. The
        // subscription happens before the run starts, so no status is
        // missed; the runner always pushes `Finished` last.
        let forwarder = {
            let mut rx = transcript.get_receiver();
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                while let Ok(msg) = rx.recv().await {
                    match msg {
                        RunMsg::Status {
                            status: status @ (RunStatus::Polling | RunStatus::Draining),
                        } => {
                            let _ = store.update_status(id, status).await;
                        }
                        RunMsg::Finished => break,
                        _ => {}
                    }
                }
            })
        };

        let result = self.runner.run(command, probe, config, transcript).await;
        let _ = forwarder.await;

        match result {
            Ok(code) => {
                self.store.set_result(id, code).await?;
                self.store.update_status(id, RunStatus::Completed).await?;
                info!(%id, code, "run completed");
                Ok(CompletedRun { id, code })
            }
            Err(err) => {
                let status = match &err {
                    RunnerError::TimedOut { .. } | RunnerError::RetriesExhausted => {
                        RunStatus::Aborted
                    }
                    _ => RunStatus::Failed,
                };
                self.store.update_status(id, status).await?;
                Err(err.into())
            }
        }
    }

    /// Live transcript of an in-flight run, if any.
    pub async fn transcript(&self, probe: &str) -> Option<Arc<TranscriptStore>> {
        self.active.read().await.get(probe).map(Arc::clone)
    }

    /// Whether a run is in flight against the probe path.
    pub async fn is_active(&self, probe: &str) -> bool {
        self.active.read().await.contains_key(probe)
    }

    /// Explicitly delete remote and local artifacts left behind by an
    /// earlier aborted run against this probe name.
    ///
    /// # Errors
    /// Returns `AlreadyRunning` if the probe path has an in-flight run, or
    /// a channel/I/O error if a deletion fails.
    pub async fn scrub(&self, probe: &str, work_dir: Option<&Path>) -> Result<(), RegistryError> {
        if self.is_active(probe).await {
            return Err(RegistryError::AlreadyRunning(probe.to_string()));
        }
        let log = log_path_for(probe).ok_or_else(|| {
            RegistryError::Runner(CommandError::InvalidProbePath(probe.to_string()).into())
        })?;

        let channel = self.runner.channel();
        channel.remove(probe).await?;
        channel.remove(&log).await?;
        LocalArtifacts::for_probe(probe, work_dir).cleanup(false).await?;
        info!(probe, "scrubbed stale run artifacts");
        Ok(())
    }

    /// Get a run record by ID.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn get(&self, id: RunId) -> Result<Option<RunRecord>, RegistryError> {
        Ok(self.store.get(id).await?)
    }

    /// List recorded runs, newest first.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn list(&self, filter: RunFilter) -> Result<Vec<RunRecord>, RegistryError> {
        Ok(self.store.list(filter).await?)
    }
}
