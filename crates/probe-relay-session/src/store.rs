//! Run history storage.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use probe_relay_core::RunStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Run identifier.
pub type RunId = Uuid;

/// Persisted record of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run identifier.
    pub id: RunId,
    /// Command text as given by the caller.
    pub command: String,
    /// Remote probe path the run was keyed on.
    pub probe: String,
    /// Current status.
    pub status: RunStatus,
    /// Probe-derived result code, once completed.
    pub result_code: Option<i32>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

/// Run filter for queries.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Filter by status.
    pub status: Option<RunStatus>,
    /// Limit results.
    pub limit: Option<usize>,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run not found: {0}")]
    NotFound(RunId),
    #[error("storage error: {0}")]
    Internal(String),
}

/// Trait for run history backends.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Record a new run.
    async fn create(&self, command: &str, probe: &str) -> Result<RunId, StoreError>;

    /// Get a run by ID.
    async fn get(&self, id: RunId) -> Result<Option<RunRecord>, StoreError>;

    /// Update run status.
    async fn update_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError>;

    /// Record the final result code.
    async fn set_result(&self, id: RunId, code: i32) -> Result<(), StoreError>;

    /// List runs, newest first, with optional filter.
    async fn list(&self, filter: RunFilter) -> Result<Vec<RunRecord>, StoreError>;
}

/// In-memory storage implementation.
///
/// Useful for single-process CI drivers. Data is lost on restart.
pub struct MemoryStore {
    runs: RwLock<HashMap<RunId, RunRecord>>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create(&self, command: &str, probe: &str) -> Result<RunId, StoreError> {
        let id = Uuid::new_v4();
        let timestamp = now();

        let record = RunRecord {
            id,
            command: command.to_string(),
            probe: probe.to_string(),
            status: RunStatus::Pending,
            result_code: None,
            created_at: timestamp,
            updated_at: timestamp,
        };

        self.runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(id, record);

        Ok(id)
    }

    async fn get(&self, id: RunId) -> Result<Option<RunRecord>, StoreError> {
        Ok(self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(&id)
            .cloned())
    }

    async fn update_status(&self, id: RunId, status: RunStatus) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let record = runs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        record.status = status;
        record.updated_at = now();

        Ok(())
    }

    async fn set_result(&self, id: RunId, code: i32) -> Result<(), StoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let record = runs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        record.result_code = Some(code);
        record.updated_at = now();

        Ok(())
    }

    async fn list(&self, filter: RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        let mut result: Vec<RunRecord> = runs
            .values()
            .filter(|r| {
                if let Some(status) = filter.status {
                    if r.status != status {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        // Newest first.
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        let id = store.create("make check", "/tmp/ci.probe").await.unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.command, "make check");
        assert_eq!(record.probe, "/tmp/ci.probe");
        assert_eq!(record.status, RunStatus::Pending);
        assert!(record.result_code.is_none());
    }

    #[tokio::test]
    async fn test_status_and_result_updates() {
        let store = MemoryStore::new();
        let id = store.create("make", "/tmp/ci.probe").await.unwrap();

        store.update_status(id, RunStatus::Polling).await.unwrap();
        store.set_result(id, 137).await.unwrap();
        store
            .update_status(id, RunStatus::Completed)
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.result_code, Some(137));
    }

    #[tokio::test]
    async fn test_update_unknown_run_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_status(Uuid::new_v4(), RunStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_by_status_and_limits() {
        let store = MemoryStore::new();
        let a = store.create("a", "/tmp/a.probe").await.unwrap();
        let b = store.create("b", "/tmp/b.probe").await.unwrap();
        store.create("c", "/tmp/c.probe").await.unwrap();

        store.update_status(a, RunStatus::Completed).await.unwrap();
        store.update_status(b, RunStatus::Completed).await.unwrap();

        let completed = store
            .list(RunFilter {
                status: Some(RunStatus::Completed),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);

        let limited = store
            .list(RunFilter {
                status: None,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}
