//! The `WorkDispatcher` trait: the contract every work backend must fulfil.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DispatchError, WorkPayload};

/// Identifier of a unit of work handed out by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Observed state of a dispatched work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkStatus {
    /// Accepted but not started yet (e.g. waiting in a queue).
    Queued,
    Running,
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

impl WorkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Cancelled)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// A backend capable of running work payloads.
///
/// The engine treats implementations as opaque: a subprocess, a remote job
/// runner and an in-process fake all look the same from here.
#[async_trait]
pub trait WorkDispatcher: Send + Sync {
    /// Start the work described by `payload` and return its identifier.
    async fn dispatch(&self, payload: &WorkPayload) -> Result<WorkItemId, DispatchError>;

    /// Report the current status of a previously dispatched item.
    async fn poll_status(&self, id: &WorkItemId) -> Result<WorkStatus, DispatchError>;

    /// Ask the backend to stop the item. Cancelling a finished item is a no-op.
    async fn cancel(&self, id: &WorkItemId) -> Result<(), DispatchError>;
}
