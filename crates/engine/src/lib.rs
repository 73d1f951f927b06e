//! `engine` crate: graph model, DAG validation, run state and the execution engine.

pub mod models;
pub mod error;
pub mod dag;
pub mod state;
pub mod store;
pub mod executor;
pub mod scheduler;

pub use models::{Edge, Graph, Node, NodeKind, NodeStatus, Run, RunStatus};
pub use error::{EngineError, ValidationError, ValidationReason};
pub use dag::{topological_sort, validate_and_sort, validate_graph};
pub use state::RunState;
pub use store::{InMemoryRunStore, PgRunStore, RunStore, StoreError};
pub use executor::{ExecutorConfig, WorkflowExecutor};
pub use scheduler::{RunHandle, Scheduler};
