//! `QueuedDispatcher`: admission control in front of another dispatcher.
//!
//! `dispatch` only enqueues and hands back a ticket. Items are forwarded to
//! the inner dispatcher when [`FairQueue`] admits them. A slot frees up when
//! a poll observes the inner item reaching a terminal state, or as soon as
//! the item is cancelled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use dispatch::{DispatchError, WorkDispatcher, WorkItemId, WorkPayload, WorkStatus};

use crate::fair::{FairQueue, QueueStats, DEFAULT_OWNER};

#[derive(Debug, Clone)]
struct Admitted {
    inner_id: WorkItemId,
    owner: String,
}

struct State {
    queue: FairQueue,
    waiting: HashMap<WorkItemId, WorkPayload>,
    admitted: HashMap<WorkItemId, Admitted>,
    finished: HashMap<WorkItemId, WorkStatus>,
}

pub struct QueuedDispatcher {
    inner: Arc<dyn WorkDispatcher>,
    state: Mutex<State>,
}

impl QueuedDispatcher {
    /// `max_concurrent_per_owner == 0` means no per-owner limit.
    pub fn new(inner: Arc<dyn WorkDispatcher>, max_concurrent_per_owner: usize) -> Self {
        Self {
            inner,
            state: Mutex::new(State {
                queue: FairQueue::new(max_concurrent_per_owner),
                waiting: HashMap::new(),
                admitted: HashMap::new(),
                finished: HashMap::new(),
            }),
        }
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.queue.stats(Utc::now())
    }

    /// Forward every currently admissible item to the inner dispatcher.
    async fn pump(&self, state: &mut State) {
        while let Some(item) = state.queue.pop_eligible() {
            let Some(payload) = state.waiting.remove(&item.ticket) else {
                state.queue.release(&item.owner);
                continue;
            };

            match self.inner.dispatch(&payload).await {
                Ok(inner_id) => {
                    info!(
                        ticket = %item.ticket,
                        work_item = %inner_id,
                        owner = %item.owner,
                        priority = %item.priority,
                        "queued work admitted"
                    );
                    state.admitted.insert(
                        item.ticket,
                        Admitted {
                            inner_id,
                            owner: item.owner,
                        },
                    );
                }
                Err(e) => {
                    warn!(ticket = %item.ticket, error = %e, "inner dispatch failed");
                    state.queue.release(&item.owner);
                    state.finished.insert(
                        item.ticket,
                        WorkStatus::Failed {
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
    }
}

#[async_trait]
impl WorkDispatcher for QueuedDispatcher {
    async fn dispatch(&self, payload: &WorkPayload) -> Result<WorkItemId, DispatchError> {
        let mut state = self.state.lock().await;
        let ticket = WorkItemId::new();
        let owner = payload
            .owner
            .clone()
            .unwrap_or_else(|| DEFAULT_OWNER.to_string());

        state.queue.push(ticket, owner, payload.priority);
        state.waiting.insert(ticket, payload.clone());
        self.pump(&mut state).await;
        Ok(ticket)
    }

    async fn poll_status(&self, id: &WorkItemId) -> Result<WorkStatus, DispatchError> {
        let mut state = self.state.lock().await;

        if let Some(status) = state.finished.get(id) {
            return Ok(status.clone());
        }
        if state.waiting.contains_key(id) {
            return Ok(WorkStatus::Queued);
        }
        let Some(admitted) = state.admitted.get(id).cloned() else {
            return Err(DispatchError::UnknownWorkItem(*id));
        };

        let status = self.inner.poll_status(&admitted.inner_id).await?;
        if status.is_terminal() {
            state.admitted.remove(id);
            state.queue.release(&admitted.owner);
            state.finished.insert(*id, status.clone());
            self.pump(&mut state).await;
        }
        Ok(status)
    }

    async fn cancel(&self, id: &WorkItemId) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;

        if state.waiting.remove(id).is_some() {
            state.queue.remove(id);
            state.finished.insert(*id, WorkStatus::Cancelled);
            return Ok(());
        }
        if let Some(admitted) = state.admitted.remove(id) {
            // Callers do not poll a cancelled item again, so free the slot now.
            let result = self.inner.cancel(&admitted.inner_id).await;
            if let Err(e) = &result {
                warn!(ticket = %id, error = %e, "inner cancel failed");
            }
            state.queue.release(&admitted.owner);
            state.finished.insert(*id, WorkStatus::Cancelled);
            self.pump(&mut state).await;
            return result;
        }
        if state.finished.contains_key(id) {
            return Ok(());
        }
        Err(DispatchError::UnknownWorkItem(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch::mock::{MockBehaviour, MockDispatcher};
    use dispatch::Priority;

    fn payload(name: &str, owner: &str) -> WorkPayload {
        WorkPayload::new(name, "inventory/test", "true").with_owner(owner)
    }

    #[tokio::test]
    async fn owner_limit_holds_work_until_slot_frees() {
        let mock = Arc::new(MockDispatcher::with_default(MockBehaviour::Hang));
        let queued = QueuedDispatcher::new(mock.clone(), 1);

        let a = queued.dispatch(&payload("alice-1", "alice")).await.unwrap();
        let b = queued.dispatch(&payload("alice-2", "alice")).await.unwrap();
        let c = queued.dispatch(&payload("bob-1", "bob")).await.unwrap();

        assert_eq!(mock.dispatched(), vec!["alice-1", "bob-1"]);
        assert_eq!(queued.poll_status(&a).await.unwrap(), WorkStatus::Running);
        assert_eq!(queued.poll_status(&b).await.unwrap(), WorkStatus::Queued);
        assert_eq!(queued.poll_status(&c).await.unwrap(), WorkStatus::Running);

        queued.cancel(&a).await.unwrap();
        assert_eq!(mock.dispatched(), vec!["alice-1", "bob-1", "alice-2"]);
        assert_eq!(queued.poll_status(&a).await.unwrap(), WorkStatus::Cancelled);
        assert_eq!(queued.poll_status(&b).await.unwrap(), WorkStatus::Running);
    }

    #[tokio::test]
    async fn cancelling_admitted_work_frees_the_slot_without_a_poll() {
        let mock = Arc::new(MockDispatcher::with_default(MockBehaviour::Hang));
        let queued = QueuedDispatcher::new(mock.clone(), 1);

        let a = queued.dispatch(&payload("a", "alice")).await.unwrap();
        assert_eq!(queued.poll_status(&a).await.unwrap(), WorkStatus::Running);
        queued.cancel(&a).await.unwrap();

        let b = queued.dispatch(&payload("b", "alice")).await.unwrap();
        assert_eq!(queued.poll_status(&b).await.unwrap(), WorkStatus::Running);
        assert_eq!(mock.dispatched(), vec!["a", "b"]);
        assert_eq!(mock.cancelled(), vec!["a"]);

        let stats = queued.stats().await;
        assert_eq!(stats.total_pending, 0);
        assert_eq!(stats.total_running, 1);
    }

    #[tokio::test]
    async fn cancelling_queued_work_never_dispatches_it() {
        let mock = Arc::new(MockDispatcher::with_default(MockBehaviour::Hang));
        let queued = QueuedDispatcher::new(mock.clone(), 1);

        let _first = queued.dispatch(&payload("first", "alice")).await.unwrap();
        let second = queued.dispatch(&payload("second", "alice")).await.unwrap();

        queued.cancel(&second).await.unwrap();
        assert_eq!(queued.poll_status(&second).await.unwrap(), WorkStatus::Cancelled);
        assert_eq!(queued.stats().await.total_pending, 0);
        assert_eq!(mock.dispatched(), vec!["first"]);
    }

    #[tokio::test]
    async fn inner_dispatch_error_surfaces_as_failed_status() {
        let mock = Arc::new(
            MockDispatcher::new().with("broken", MockBehaviour::RejectDispatch("no runner".into())),
        );
        let queued = QueuedDispatcher::new(mock.clone(), 0);

        let id = queued
            .dispatch(&WorkPayload::new("broken", "t", "s").with_priority(Priority::High))
            .await
            .unwrap();

        match queued.poll_status(&id).await.unwrap() {
            WorkStatus::Failed { reason } => assert!(reason.contains("no runner")),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_ticket_is_an_error() {
        let queued = QueuedDispatcher::new(Arc::new(MockDispatcher::new()), 0);
        let err = queued.poll_status(&WorkItemId::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownWorkItem(_)));
    }
}
