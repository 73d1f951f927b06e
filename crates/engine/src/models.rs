//! Core domain models for the workflow engine.
//!
//! A [`Graph`] is the caller-supplied definition; a [`Run`] is one execution
//! of it. Both serialise to JSON so they can be loaded from files and stored
//! in the `workflow_runs` table.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dispatch::{WorkItemId, WorkPayload};

use crate::EngineError;

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Entry point. Carries no work.
    Start,
    /// Dispatches a [`WorkPayload`].
    Task,
    /// Exit point. Carries no work.
    End,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Task => write!(f, "task"),
            Self::End => write!(f, "end"),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this graph (referenced by edges).
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub label: String,
    /// Present iff `kind == Task`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work: Option<WorkPayload>,
}

impl Node {
    pub fn start(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Start,
            label: "Start".into(),
            work: None,
        }
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::End,
            label: "End".into(),
            work: None,
        }
    }

    pub fn task(id: impl Into<String>, label: impl Into<String>, work: WorkPayload) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Task,
            label: label.into(),
            work: Some(work),
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed dependency: `target` waits for `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Graph {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes,
            edges,
            created_at: Utc::now(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle of a [`Run`]. Every state except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(Self::Running),
            "success"   => Ok(Self::Success),
            "failed"    => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Per-run lifecycle of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    /// `pending → running | success | skipped`, `running → success | failed`.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Success)
                | (Pending, Skipped)
                | (Running, Success)
                | (Running, Failed)
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// One execution of a [`Graph`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub graph_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Node statuses as of the last save; complete once the run is terminal.
    #[serde(default)]
    pub node_statuses: BTreeMap<String, NodeStatus>,
    #[serde(default)]
    pub work_items: BTreeMap<String, WorkItemId>,
}

impl Run {
    /// A fresh run in the `running` state.
    pub fn start(graph_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            graph_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
            node_statuses: BTreeMap::new(),
            work_items: BTreeMap::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the run to a terminal state. Allowed exactly once.
    pub fn finish(
        &mut self,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<(), EngineError> {
        if self.status.is_terminal() || !status.is_terminal() {
            return Err(EngineError::IllegalRunTransition {
                run_id: self.id,
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.error_message = error_message;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_deserializes_from_json() {
        let graph: Graph = serde_json::from_value(json!({
            "name": "restart",
            "nodes": [
                { "id": "s", "type": "start", "label": "Start" },
                { "id": "a", "type": "task", "label": "Drain",
                  "work": { "name": "drain", "target": "inv/1", "script": "true" } },
                { "id": "e", "type": "end", "label": "End" }
            ],
            "edges": [
                { "id": "e1", "source": "s", "target": "a" },
                { "id": "e2", "source": "a", "target": "e" }
            ]
        }))
        .expect("graph json");

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.node("a").map(|n| n.kind), Some(NodeKind::Task));
        assert!(graph.node("s").and_then(|n| n.work.as_ref()).is_none());
    }

    #[test]
    fn unknown_node_type_is_rejected_by_serde() {
        let result: Result<Node, _> =
            serde_json::from_value(json!({ "id": "x", "type": "loop", "label": "X" }));
        assert!(result.is_err());
    }

    #[test]
    fn node_status_transitions() {
        use NodeStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Failed));
        assert!(!Success.can_transition_to(Running));
        assert!(!Skipped.can_transition_to(Success));
        assert!(!Running.can_transition_to(Pending));
    }

    #[test]
    fn run_finishes_exactly_once() {
        let mut run = Run::start(Uuid::new_v4());
        assert!(!run.is_terminal());

        run.finish(RunStatus::Failed, Some("boom".into())).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.finished_at.is_some());

        let err = run.finish(RunStatus::Success, None).unwrap_err();
        assert!(matches!(err, EngineError::IllegalRunTransition { .. }));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn run_cannot_finish_as_running() {
        let mut run = Run::start(Uuid::new_v4());
        assert!(run.finish(RunStatus::Running, None).is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>(), Ok(status));
        }
    }
}
