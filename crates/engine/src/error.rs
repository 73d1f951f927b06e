//! Engine-level error types.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use dispatch::{DispatchError, PayloadError, WorkItemId};

use crate::models::{NodeKind, NodeStatus, RunStatus};
use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Machine-checkable category of a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationReason {
    DuplicateId,
    MissingField,
    MissingReference,
    Cardinality,
    SelfLoop,
    InvalidTopology,
    Cycle,
    UnreachableNode,
    InvalidPayload,
}

impl ValidationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateId => "duplicate-id",
            Self::MissingField => "missing-field",
            Self::MissingReference => "missing-reference",
            Self::Cardinality => "cardinality",
            Self::SelfLoop => "self-loop",
            Self::InvalidTopology => "invalid-topology",
            Self::Cycle => "cycle",
            Self::UnreachableNode => "unreachable-node",
            Self::InvalidPayload => "invalid-payload",
        }
    }
}

impl std::fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first structural violation found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    // ------ Node checks ------

    #[error("graph has no nodes")]
    EmptyGraph,

    #[error("node at index {index} has an empty id")]
    EmptyNodeId { index: usize },

    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    #[error("node '{0}' has an empty label")]
    EmptyLabel(String),

    #[error("task node '{node_id}' has no work payload")]
    MissingPayload { node_id: String },

    #[error("{kind} node '{node_id}' must not carry a work payload")]
    UnexpectedPayload { node_id: String, kind: NodeKind },

    #[error("task node '{node_id}' has an invalid work payload: {source}")]
    InvalidPayload {
        node_id: String,
        #[source]
        source: PayloadError,
    },

    #[error("graph must contain exactly one {kind} node, found {count}")]
    Cardinality { kind: NodeKind, count: usize },

    // ------ Edge checks ------

    #[error("edge at index {index} has an empty id")]
    EmptyEdgeId { index: usize },

    #[error("duplicate edge ID: '{0}'")]
    DuplicateEdgeId(String),

    /// An edge references a node ID that doesn't exist in the graph.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    #[error("edge '{edge_id}' is a self-loop on node '{node_id}'")]
    SelfLoop { edge_id: String, node_id: String },

    #[error("edge '{edge_id}' leaves end node '{node_id}'")]
    EdgeFromEnd { edge_id: String, node_id: String },

    #[error("edge '{edge_id}' enters start node '{node_id}'")]
    EdgeIntoStart { edge_id: String, node_id: String },

    // ------ Graph checks ------

    /// `path` starts and ends on the same node when the cycle was traced by
    /// DFS; it lists the unsorted remainder when found by the sort.
    #[error("workflow graph contains a cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("node '{0}' is unreachable from the start node")]
    UnreachableFromStart(String),

    #[error("node '{0}' cannot reach the end node")]
    CannotReachEnd(String),
}

impl ValidationError {
    pub fn reason(&self) -> ValidationReason {
        use ValidationError::*;
        match self {
            DuplicateNodeId(_) | DuplicateEdgeId(_) => ValidationReason::DuplicateId,
            EmptyNodeId { .. } | EmptyLabel(_) | EmptyEdgeId { .. } => {
                ValidationReason::MissingField
            }
            UnknownNodeReference { .. } => ValidationReason::MissingReference,
            EmptyGraph | Cardinality { .. } => ValidationReason::Cardinality,
            SelfLoop { .. } => ValidationReason::SelfLoop,
            EdgeFromEnd { .. } | EdgeIntoStart { .. } => ValidationReason::InvalidTopology,
            CycleDetected { .. } => ValidationReason::Cycle,
            UnreachableFromStart(_) | CannotReachEnd(_) => ValidationReason::UnreachableNode,
            MissingPayload { .. } | UnexpectedPayload { .. } | InvalidPayload { .. } => {
                ValidationReason::InvalidPayload
            }
        }
    }

    /// Node or edge ids involved in the violation.
    pub fn offending_ids(&self) -> Vec<&str> {
        use ValidationError::*;
        match self {
            EmptyGraph | EmptyNodeId { .. } | EmptyEdgeId { .. } | Cardinality { .. } => Vec::new(),
            DuplicateNodeId(id) | DuplicateEdgeId(id) | EmptyLabel(id) => vec![id.as_str()],
            UnreachableFromStart(id) | CannotReachEnd(id) => vec![id.as_str()],
            MissingPayload { node_id }
            | UnexpectedPayload { node_id, .. }
            | InvalidPayload { node_id, .. } => vec![node_id.as_str()],
            UnknownNodeReference { edge_id, node_id, .. }
            | SelfLoop { edge_id, node_id }
            | EdgeFromEnd { edge_id, node_id }
            | EdgeIntoStart { edge_id, node_id } => vec![edge_id.as_str(), node_id.as_str()],
            CycleDetected { path } => path.iter().map(String::as_str).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Errors produced by the workflow engine (validation + execution).
///
/// The `Display` text of an execution error becomes the run's
/// `error_message`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("graph validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("node '{node_id}' timed out after {waited:?} waiting for its dependencies")]
    DependencyTimeout { node_id: String, waited: Duration },

    #[error("node '{node_id}' could not be dispatched: {source}")]
    Dispatch {
        node_id: String,
        #[source]
        source: DispatchError,
    },

    #[error("node '{node_id}' failed (work item {work_item}): {reason}")]
    WorkFailed {
        node_id: String,
        work_item: WorkItemId,
        reason: String,
    },

    #[error("node '{node_id}' timed out after {waited:?} (work item {work_item})")]
    WorkTimeout {
        node_id: String,
        work_item: WorkItemId,
        waited: Duration,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("node '{node_id}' cannot move from {from} to {to}")]
    IllegalTransition {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("node '{0}' is not part of this run")]
    UnknownNode(String),

    #[error("run {run_id} cannot move from {from} to {to}")]
    IllegalRunTransition {
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("run store error: {0}")]
    Store(#[from] StoreError),

    #[error("run task aborted: {0}")]
    Join(String),
}
