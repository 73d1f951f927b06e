//! `db` crate: Postgres storage for workflow runs.
//!
//! One table, `workflow_runs`, holds each run's status, timestamps and final
//! node table. The engine converts its `Run` to and from [`RunRow`]; nothing
//! here knows about graphs or execution.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use models::RunRow;
pub use pool::{create_pool, run_migrations, DbPool};
