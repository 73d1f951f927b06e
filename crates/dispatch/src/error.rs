//! Dispatcher-level error types.

use thiserror::Error;

use crate::WorkItemId;

/// Errors returned by a [`WorkDispatcher`](crate::WorkDispatcher).
///
/// None of these are retried by the engine: a dispatch error fails the
/// node, and a poll error is tolerated until the work timeout expires.
#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    /// The unit of work could not be started.
    #[error("failed to start work '{name}': {message}")]
    Spawn { name: String, message: String },

    /// The dispatcher has no record of this work item.
    #[error("unknown work item {0}")]
    UnknownWorkItem(WorkItemId),

    /// Status could not be read back from the backend.
    #[error("failed to poll work item {id}: {message}")]
    Poll { id: WorkItemId, message: String },

    /// The backend refused to cancel the item.
    #[error("failed to cancel work item {id}: {message}")]
    Cancel { id: WorkItemId, message: String },
}

/// Reasons a [`WorkPayload`](crate::WorkPayload) is considered malformed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("work name must not be empty")]
    EmptyName,

    #[error("target reference must not be empty")]
    EmptyTarget,

    #[error("script must not be empty")]
    EmptyScript,

    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("params must be a JSON object")]
    ParamsNotObject,
}
