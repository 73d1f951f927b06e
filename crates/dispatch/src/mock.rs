//! `MockDispatcher`: a test double for `WorkDispatcher`.
//!
//! Outcomes are scripted per work `name`, so a graph's task payloads decide
//! what each node does when the engine dispatches it.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{DispatchError, WorkDispatcher, WorkItemId, WorkPayload, WorkStatus};

/// Behaviour injected into `MockDispatcher` for a given work name.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Terminal success on the first poll.
    Succeed,
    /// Report `Running` for `n` polls, then succeed.
    SucceedAfter(u32),
    /// Terminal failure on the first poll.
    Fail(String),
    /// `dispatch` itself returns an error.
    RejectDispatch(String),
    /// Never reaches a terminal state unless cancelled.
    Hang,
}

#[derive(Debug)]
struct MockItem {
    name: String,
    behaviour: MockBehaviour,
    polls: u32,
    cancelled: bool,
}

/// A dispatcher that records every call it receives and returns
/// programmer-specified outcomes.
pub struct MockDispatcher {
    default: MockBehaviour,
    behaviours: HashMap<String, MockBehaviour>,
    items: Mutex<HashMap<WorkItemId, MockItem>>,
    /// Work names in dispatch order.
    dispatched: Mutex<Vec<String>>,
    /// Work names whose items were cancelled.
    cancelled: Mutex<Vec<String>>,
}

impl MockDispatcher {
    /// Every work item succeeds unless overridden with [`MockDispatcher::with`].
    pub fn new() -> Self {
        Self::with_default(MockBehaviour::Succeed)
    }

    pub fn with_default(default: MockBehaviour) -> Self {
        Self {
            default,
            behaviours: HashMap::new(),
            items: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Script the outcome for work items named `name`.
    pub fn with(mut self, name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        self.behaviours.insert(name.into(), behaviour);
        self
    }

    /// Names of all work that was dispatched, in order.
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.lock().unwrap().len()
    }

    /// Names of all work that was cancelled, in order.
    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkDispatcher for MockDispatcher {
    async fn dispatch(&self, payload: &WorkPayload) -> Result<WorkItemId, DispatchError> {
        let behaviour = self
            .behaviours
            .get(&payload.name)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        if let MockBehaviour::RejectDispatch(message) = &behaviour {
            return Err(DispatchError::Spawn {
                name: payload.name.clone(),
                message: message.clone(),
            });
        }

        self.dispatched.lock().unwrap().push(payload.name.clone());

        let id = WorkItemId::new();
        self.items.lock().unwrap().insert(
            id,
            MockItem {
                name: payload.name.clone(),
                behaviour,
                polls: 0,
                cancelled: false,
            },
        );
        Ok(id)
    }

    async fn poll_status(&self, id: &WorkItemId) -> Result<WorkStatus, DispatchError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or(DispatchError::UnknownWorkItem(*id))?;

        if item.cancelled {
            return Ok(WorkStatus::Cancelled);
        }

        item.polls += 1;
        let status = match &item.behaviour {
            MockBehaviour::Succeed => WorkStatus::Succeeded,
            MockBehaviour::SucceedAfter(n) if item.polls > *n => WorkStatus::Succeeded,
            MockBehaviour::SucceedAfter(_) | MockBehaviour::Hang => WorkStatus::Running,
            MockBehaviour::Fail(reason) => WorkStatus::Failed {
                reason: reason.clone(),
            },
            MockBehaviour::RejectDispatch(_) => unreachable!("rejected items are never stored"),
        };
        Ok(status)
    }

    async fn cancel(&self, id: &WorkItemId) -> Result<(), DispatchError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or(DispatchError::UnknownWorkItem(*id))?;
        if !item.cancelled {
            item.cancelled = true;
            self.cancelled.lock().unwrap().push(item.name.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_are_reported() {
        let mock = MockDispatcher::new()
            .with("bad", MockBehaviour::Fail("exit 2".into()))
            .with("slow", MockBehaviour::SucceedAfter(2));

        let ok = mock.dispatch(&WorkPayload::new("ok", "t", "s")).await.unwrap();
        let bad = mock.dispatch(&WorkPayload::new("bad", "t", "s")).await.unwrap();
        let slow = mock.dispatch(&WorkPayload::new("slow", "t", "s")).await.unwrap();

        assert_eq!(mock.poll_status(&ok).await.unwrap(), WorkStatus::Succeeded);
        assert_eq!(
            mock.poll_status(&bad).await.unwrap(),
            WorkStatus::Failed { reason: "exit 2".into() }
        );
        assert_eq!(mock.poll_status(&slow).await.unwrap(), WorkStatus::Running);
        assert_eq!(mock.poll_status(&slow).await.unwrap(), WorkStatus::Running);
        assert_eq!(mock.poll_status(&slow).await.unwrap(), WorkStatus::Succeeded);

        assert_eq!(mock.dispatched(), vec!["ok", "bad", "slow"]);
    }

    #[tokio::test]
    async fn rejected_dispatch_is_not_recorded() {
        let mock =
            MockDispatcher::new().with("nope", MockBehaviour::RejectDispatch("no slots".into()));
        let err = mock
            .dispatch(&WorkPayload::new("nope", "t", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Spawn { .. }));
        assert_eq!(mock.dispatch_count(), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let mock = MockDispatcher::with_default(MockBehaviour::Hang);
        let id = mock.dispatch(&WorkPayload::new("hang", "t", "s")).await.unwrap();

        mock.cancel(&id).await.unwrap();
        mock.cancel(&id).await.unwrap();

        assert_eq!(mock.poll_status(&id).await.unwrap(), WorkStatus::Cancelled);
        assert_eq!(mock.cancelled(), vec!["hang"]);
    }
}
