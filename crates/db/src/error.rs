//! Errors surfaced by the run-tracking persistence layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// The pool could not reach Postgres at startup.
    #[error("cannot connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// No `workflow_runs` row has the requested id.
    #[error("run not found")]
    NotFound,

    #[error("applying migrations failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
