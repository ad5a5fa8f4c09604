//! Run persistence.
//!
//! The relational store that owns run rows in production sits behind the
//! narrow [`RunStore`] trait (`find_by_id` / `insert` / `update`). Two
//! implementations ship here: an in-memory store for tests and single
//! process use, and a redb-backed store for durable local deployments.

use async_trait::async_trait;
use qaflow_core::error::{QaflowError, Result};
use qaflow_core::model::ExecutionSample;
use qaflow_core::run::Run;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// RunStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn find_by_id(&self, run_id: &str) -> Result<Option<Run>>;
    async fn insert(&self, run: &Run) -> Result<()>;
    async fn update(&self, run: &Run) -> Result<()>;

    /// Per-case execution history across a project's past runs, the input
    /// to the flaky-rate calculator.
    async fn execution_history(&self, project_id: &str) -> Result<Vec<ExecutionSample>>;
    async fn append_execution_history(
        &self,
        project_id: &str,
        samples: &[ExecutionSample],
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryRunStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<String, Run>>,
    history: Mutex<HashMap<String, Vec<ExecutionSample>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn find_by_id(&self, run_id: &str) -> Result<Option<Run>> {
        let runs = self
            .runs
            .lock()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        Ok(runs.get(run_id).cloned())
    }

    async fn insert(&self, run: &Run) -> Result<()> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update(&self, run: &Run) -> Result<()> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        if !runs.contains_key(&run.id) {
            return Err(QaflowError::RunNotFound(run.id.clone()));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn execution_history(&self, project_id: &str) -> Result<Vec<ExecutionSample>> {
        let history = self
            .history
            .lock()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        Ok(history.get(project_id).cloned().unwrap_or_default())
    }

    async fn append_execution_history(
        &self,
        project_id: &str,
        samples: &[ExecutionSample],
    ) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        history
            .entry(project_id.to_string())
            .or_default()
            .extend_from_slice(samples);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RedbRunStore
// ---------------------------------------------------------------------------

/// Key: run id. Value: JSON-encoded `Run`.
const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Key: project id. Value: JSON-encoded `Vec<ExecutionSample>`.
const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("execution_history");

/// Durable local run store on redb.
pub struct RedbRunStore {
    db: Database,
}

impl RedbRunStore {
    /// Open or create the database at `path`, ensuring both tables exist
    /// before any reads.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| QaflowError::Store(e.to_string()))?;
        let wt = db
            .begin_write()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        wt.open_table(RUNS)
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        wt.open_table(HISTORY)
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        wt.commit().map_err(|e| QaflowError::Store(e.to_string()))?;
        Ok(Self { db })
    }

    fn put_run(&self, run: &Run) -> Result<()> {
        let value = serde_json::to_vec(run)?;
        let wt = self
            .db
            .begin_write()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        {
            let mut table = wt
                .open_table(RUNS)
                .map_err(|e| QaflowError::Store(e.to_string()))?;
            table
                .insert(run.id.as_str(), value.as_slice())
                .map_err(|e| QaflowError::Store(e.to_string()))?;
        }
        wt.commit().map_err(|e| QaflowError::Store(e.to_string()))?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        let table = rt
            .open_table(RUNS)
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        match table
            .get(run_id)
            .map_err(|e| QaflowError::Store(e.to_string()))?
        {
            Some(v) => {
                let run: Run = serde_json::from_slice(v.value())?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// List all runs, newest first.
    pub fn list_all(&self) -> Result<Vec<Run>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        let table = rt
            .open_table(RUNS)
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(|e| QaflowError::Store(e.to_string()))? {
            let (_, v) = entry.map_err(|e| QaflowError::Store(e.to_string()))?;
            let run: Run = serde_json::from_slice(v.value())?;
            result.push(run);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

#[async_trait]
impl RunStore for RedbRunStore {
    async fn find_by_id(&self, run_id: &str) -> Result<Option<Run>> {
        self.get_run(run_id)
    }

    async fn insert(&self, run: &Run) -> Result<()> {
        self.put_run(run)
    }

    async fn update(&self, run: &Run) -> Result<()> {
        if self.get_run(&run.id)?.is_none() {
            return Err(QaflowError::RunNotFound(run.id.clone()));
        }
        self.put_run(run)
    }

    async fn execution_history(&self, project_id: &str) -> Result<Vec<ExecutionSample>> {
        let rt = self
            .db
            .begin_read()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        let table = rt
            .open_table(HISTORY)
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        match table
            .get(project_id)
            .map_err(|e| QaflowError::Store(e.to_string()))?
        {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Ok(Vec::new()),
        }
    }

    async fn append_execution_history(
        &self,
        project_id: &str,
        samples: &[ExecutionSample],
    ) -> Result<()> {
        let mut existing = self.execution_history(project_id).await?;
        existing.extend_from_slice(samples);
        let value = serde_json::to_vec(&existing)?;
        let wt = self
            .db
            .begin_write()
            .map_err(|e| QaflowError::Store(e.to_string()))?;
        {
            let mut table = wt
                .open_table(HISTORY)
                .map_err(|e| QaflowError::Store(e.to_string()))?;
            table
                .insert(project_id, value.as_slice())
                .map_err(|e| QaflowError::Store(e.to_string()))?;
        }
        wt.commit().map_err(|e| QaflowError::Store(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
