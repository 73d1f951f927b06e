//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// A persisted run of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// `{ node_id: status }` snapshot taken at the last save.
    pub node_statuses: serde_json::Value,
    /// `{ node_id: work_item_id }` for every dispatched node.
    pub work_items: serde_json::Value,
}
