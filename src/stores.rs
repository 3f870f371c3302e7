//! Persistence traits and in-memory implementations.
//!
//! Two seams back the runner's durability story:
//!
//! - [`ActivityStore`]: write-ahead record of completed activity results,
//!   keyed by the activity's position in the run. On replay after a crash,
//!   a recorded result short-circuits re-execution.
//! - [`ResultSink`]: where the terminal [`ExecutionResult`] is persisted.
//!
//! The in-memory implementations are suitable for tests and single-process
//! use; production deployments implement the traits over their own storage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::ExecutionResult;

/// Write-ahead store for completed activity results.
///
/// Keys are rendered activity positions (`iter3:tool:1`); values are the
/// serialized activity results. Recording must happen before the result is
/// released to the caller, so a crash between the two re-delivers the
/// recorded value instead of re-executing.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Look up a previously recorded result.
    ///
    /// # Errors
    /// Returns an error if the underlying storage fails.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Record a completed activity result.
    ///
    /// # Errors
    /// Returns an error if the underlying storage fails.
    async fn record(&self, key: &str, result: Value) -> Result<()>;
}

/// In-memory activity store backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct InMemoryActivityStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryActivityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded results (for tests).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ActivityStore for InMemoryActivityStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self.entries.read().ok().context("lock poisoned")?;
        Ok(entries.get(key).cloned())
    }

    async fn record(&self, key: &str, result: Value) -> Result<()> {
        let mut entries = self.entries.write().ok().context("lock poisoned")?;
        entries.insert(key.to_string(), result);
        Ok(())
    }
}

/// Namespacing wrapper that scopes activity keys to one task.
///
/// Activity keys are positional (`iter0:model:0`), so two runs sharing a
/// backing store would collide without a per-task prefix. The runner wraps
/// the configured store in one of these for each run.
pub struct ScopedActivityStore {
    inner: std::sync::Arc<dyn ActivityStore>,
    prefix: String,
}

impl ScopedActivityStore {
    #[must_use]
    pub fn new(inner: std::sync::Arc<dyn ActivityStore>, task_id: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: task_id.into(),
        }
    }

    fn scoped(&self, key: &str) -> String {
        format!("{}/{key}", self.prefix)
    }
}

#[async_trait]
impl ActivityStore for ScopedActivityStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(&self.scoped(key)).await
    }

    async fn record(&self, key: &str, result: Value) -> Result<()> {
        self.inner.record(&self.scoped(key), result).await
    }
}

/// Destination for terminal run results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist the outcome of a completed run.
    ///
    /// # Errors
    /// Returns an error if the underlying storage fails. The runner logs
    /// persistence failures; they never change the returned result.
    async fn persist(&self, task_id: &str, result: &ExecutionResult) -> Result<()>;
}

/// In-memory result sink backed by a `RwLock<HashMap>`.
#[derive(Default)]
pub struct InMemoryResultSink {
    results: RwLock<HashMap<String, ExecutionResult>>,
}

impl InMemoryResultSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a persisted result by task id (for tests).
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<ExecutionResult> {
        self.results
            .read()
            .ok()
            .and_then(|r| r.get(task_id).cloned())
    }
}

#[async_trait]
impl ResultSink for InMemoryResultSink {
    async fn persist(&self, task_id: &str, result: &ExecutionResult) -> Result<()> {
        let mut results = self.results.write().ok().context("lock poisoned")?;
        results.insert(task_id.to_string(), result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn activity_store_round_trip() {
        let store = InMemoryActivityStore::new();
        assert!(store.get("iter0:model:0").await.unwrap().is_none());

        store
            .record("iter0:model:0", json!({"cost": 0.01}))
            .await
            .unwrap();

        let value = store.get("iter0:model:0").await.unwrap().unwrap();
        assert_eq!(value["cost"], 0.01);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn activity_store_overwrites_same_key() {
        let store = InMemoryActivityStore::new();
        store.record("k", json!(1)).await.unwrap();
        store.record("k", json!(2)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().unwrap(), json!(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn scoped_store_isolates_tasks() {
        let backing = std::sync::Arc::new(InMemoryActivityStore::new());
        let a = ScopedActivityStore::new(backing.clone(), "task-a");
        let b = ScopedActivityStore::new(backing.clone(), "task-b");

        a.record("iter0:model:0", json!("from a")).await.unwrap();

        assert_eq!(
            a.get("iter0:model:0").await.unwrap().unwrap(),
            json!("from a")
        );
        assert!(b.get("iter0:model:0").await.unwrap().is_none());
        assert!(
            backing
                .get("task-a/iter0:model:0")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn result_sink_stores_by_task_id() {
        let sink = InMemoryResultSink::new();
        let result = ExecutionResult::failed("boom", 2, 0.0, vec![]);

        sink.persist("task-1", &result).await.unwrap();

        let stored = sink.get("task-1").expect("persisted result");
        assert_eq!(stored.iterations_used, 2);
        assert!(sink.get("task-2").is_none());
    }
}
