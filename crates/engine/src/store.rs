//! Run persistence.
//!
//! The executor talks to a [`RunStore`] instead of the database directly, so
//! the engine can run against Postgres in production and an in-memory map in
//! tests and one-shot CLI runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use db::{models::RunRow, DbError, DbPool};

use crate::models::{Run, RunStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt run record: {0}")]
    Corrupt(String),
}

/// Where runs are written at creation and at their terminal transition.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or overwrite the run with the same id.
    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Every run of `graph_id`, newest first.
    async fn list_runs(&self, graph_id: Uuid) -> Result<Vec<Run>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<BTreeMap<Uuid, Run>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_runs(&self, graph_id: Uuid) -> Result<Vec<Run>, StoreError> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.graph_id == graph_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// [`RunStore`] backed by the `workflow_runs` table.
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let row = run_to_row(run)?;
        db::repository::runs::upsert_run(&self.pool, &row).await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        match db::repository::runs::get_run(&self.pool, id).await {
            Ok(row) => Ok(Some(row_to_run(row)?)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_runs(&self, graph_id: Uuid) -> Result<Vec<Run>, StoreError> {
        db::repository::runs::list_runs_for_graph(&self.pool, graph_id)
            .await?
            .into_iter()
            .map(row_to_run)
            .collect()
    }
}

fn run_to_row(run: &Run) -> Result<RunRow, StoreError> {
    Ok(RunRow {
        id: run.id,
        graph_id: run.graph_id,
        status: run.status.to_string(),
        started_at: run.started_at,
        finished_at: run.finished_at,
        error_message: run.error_message.clone(),
        node_statuses: serde_json::to_value(&run.node_statuses)?,
        work_items: serde_json::to_value(&run.work_items)?,
    })
}

fn row_to_run(row: RunRow) -> Result<Run, StoreError> {
    let status: RunStatus = row.status.parse().map_err(StoreError::Corrupt)?;
    Ok(Run {
        id: row.id,
        graph_id: row.graph_id,
        status,
        started_at: row.started_at,
        finished_at: row.finished_at,
        error_message: row.error_message,
        node_statuses: serde_json::from_value(row.node_statuses)?,
        work_items: serde_json::from_value(row.work_items)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeStatus;
    use chrono::Duration;
    use dispatch::WorkItemId;

    #[tokio::test]
    async fn in_memory_store_overwrites_by_id() {
        let store = InMemoryRunStore::new();
        let mut run = Run::start(Uuid::new_v4());
        store.save_run(&run).await.unwrap();

        run.finish(RunStatus::Success, None).unwrap();
        store.save_run(&run).await.unwrap();

        assert_eq!(store.len().await, 1);
        let loaded = store.get_run(run.id).await.unwrap().expect("saved");
        assert_eq!(loaded.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn in_memory_store_lists_newest_first() {
        let store = InMemoryRunStore::new();
        let graph_id = Uuid::new_v4();

        let older = Run::start(graph_id);
        let mut newer = Run::start(graph_id);
        newer.started_at = older.started_at + Duration::seconds(5);
        let other = Run::start(Uuid::new_v4());

        for run in [&older, &newer, &other] {
            store.save_run(run).await.unwrap();
        }

        let ids: Vec<Uuid> =
            store.list_runs(graph_id).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[tokio::test]
    async fn missing_run_is_none() {
        let store = InMemoryRunStore::new();
        assert!(store.get_run(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[test]
    fn row_conversion_preserves_node_tables() {
        let mut run = Run::start(Uuid::new_v4());
        run.node_statuses.insert("a".into(), NodeStatus::Success);
        run.node_statuses.insert("b".into(), NodeStatus::Skipped);
        run.work_items.insert("a".into(), WorkItemId::new());
        run.finish(RunStatus::Failed, Some("node 'x' failed".into())).unwrap();

        let row = run_to_row(&run).unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.node_statuses["b"], "skipped");

        assert_eq!(row_to_run(row).unwrap(), run);
    }

    #[test]
    fn unknown_status_in_row_is_corrupt() {
        let mut row = run_to_row(&Run::start(Uuid::new_v4())).unwrap();
        row.status = "paused".into();
        assert!(matches!(row_to_run(row), Err(StoreError::Corrupt(_))));
    }
}
