//! Workflow run repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::RunRow, DbError};

const RUN_COLUMNS: &str =
    "id, graph_id, status, started_at, finished_at, error_message, node_statuses, work_items";

/// Insert a run, or overwrite every mutable column if it already exists.
///
/// Called at run creation and again at the terminal transition.
pub async fn upsert_run(pool: &PgPool, row: &RunRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_runs
            (id, graph_id, status, started_at, finished_at, error_message, node_statuses, work_items)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE
        SET status        = EXCLUDED.status,
            finished_at   = EXCLUDED.finished_at,
            error_message = EXCLUDED.error_message,
            node_statuses = EXCLUDED.node_statuses,
            work_items    = EXCLUDED.work_items
        "#,
    )
    .bind(row.id)
    .bind(row.graph_id)
    .bind(&row.status)
    .bind(row.started_at)
    .bind(row.finished_at)
    .bind(&row.error_message)
    .bind(&row.node_statuses)
    .bind(&row.work_items)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single run by its primary key.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<RunRow, DbError> {
    let row = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return every run of a graph, newest first.
pub async fn list_runs_for_graph(pool: &PgPool, graph_id: Uuid) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE graph_id = $1 ORDER BY started_at DESC"
    ))
    .bind(graph_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
