//! Per-run execution state.
//!
//! [`RunState`] pairs the node status table with the run's cancellation
//! token. The table sits behind a `watch` channel: the executor is the only
//! writer, everyone else reads point-in-time copies, and waiters are woken on
//! every change instead of polling.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dispatch::WorkItemId;

use crate::error::EngineError;
use crate::models::NodeStatus;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTable {
    pub statuses: BTreeMap<String, NodeStatus>,
    pub work_items: BTreeMap<String, WorkItemId>,
}

#[derive(Debug)]
pub struct RunState {
    run_id: Uuid,
    cancel: CancellationToken,
    table: watch::Sender<NodeTable>,
    /// Guards the hand-off between a late cancel and finalization.
    finished: Mutex<bool>,
}

impl RunState {
    /// Every node in `node_ids` starts `pending`.
    pub fn new<I, S>(run_id: Uuid, node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let statuses = node_ids
            .into_iter()
            .map(|id| (id.into(), NodeStatus::Pending))
            .collect();
        let (table, _) = watch::channel(NodeTable {
            statuses,
            work_items: BTreeMap::new(),
        });

        Self {
            run_id,
            cancel: CancellationToken::new(),
            table,
            finished: Mutex::new(false),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    // -----------------------------------------------------------------------
    // Status table
    // -----------------------------------------------------------------------

    /// Copy of every node's current status.
    pub fn snapshot(&self) -> BTreeMap<String, NodeStatus> {
        self.table.borrow().statuses.clone()
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.table.borrow().statuses.get(node_id).copied()
    }

    /// Apply a single status transition.
    ///
    /// # Errors
    /// [`EngineError::UnknownNode`] or [`EngineError::IllegalTransition`];
    /// the table is left unchanged in both cases.
    pub fn transition(&self, node_id: &str, to: NodeStatus) -> Result<(), EngineError> {
        let mut result = Ok(());
        self.table.send_if_modified(|table| match table.statuses.get_mut(node_id) {
            None => {
                result = Err(EngineError::UnknownNode(node_id.to_owned()));
                false
            }
            Some(current) if !current.can_transition_to(to) => {
                result = Err(EngineError::IllegalTransition {
                    node_id: node_id.to_owned(),
                    from: *current,
                    to,
                });
                false
            }
            Some(current) => {
                *current = to;
                true
            }
        });
        result
    }

    /// Wait until every node in `dependencies` is terminal.
    ///
    /// Ids missing from the table count as terminal.
    ///
    /// # Errors
    /// [`EngineError::Cancelled`] if the run is cancelled first, and
    /// [`EngineError::DependencyTimeout`] once `timeout` elapses.
    pub async fn wait_for_dependencies(
        &self,
        node_id: &str,
        dependencies: &[String],
        timeout: Duration,
    ) -> Result<(), EngineError> {
        let mut rx = self.table.subscribe();
        let settled = async move {
            rx.wait_for(|table| {
                dependencies.iter().all(|dep| {
                    table.statuses.get(dep).map_or(true, |s| s.is_terminal())
                })
            })
            .await
            .is_ok()
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            outcome = tokio::time::timeout(timeout, settled) => match outcome {
                Ok(true) => Ok(()),
                // The sender lives as long as `self`, so this is unreachable
                // in practice.
                Ok(false) => Err(EngineError::Cancelled),
                Err(_) => Err(EngineError::DependencyTimeout {
                    node_id: node_id.to_owned(),
                    waited: timeout,
                }),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Work items
    // -----------------------------------------------------------------------

    pub fn bind_work_item(&self, node_id: &str, item: WorkItemId) {
        self.table.send_modify(|table| {
            table.work_items.insert(node_id.to_owned(), item);
        });
    }

    pub fn work_items(&self) -> BTreeMap<String, WorkItemId> {
        self.table.borrow().work_items.clone()
    }

    /// Work items whose node is still `running`.
    pub fn running_work_items(&self) -> Vec<(String, WorkItemId)> {
        let table = self.table.borrow();
        table
            .work_items
            .iter()
            .filter(|(node, _)| table.statuses.get(*node) == Some(&NodeStatus::Running))
            .map(|(node, item)| (node.clone(), *item))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Cancellation and completion
    // -----------------------------------------------------------------------

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel unless the run has already been sealed by [`mark_finished`].
    ///
    /// Returns `true` when the request was accepted. An accepted request is
    /// always seen by the executor, so the run cannot end `success`.
    ///
    /// [`mark_finished`]: Self::mark_finished
    pub fn request_cancel(&self) -> bool {
        let finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        if *finished {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Seal the run. Returns whether a cancellation was requested first.
    pub(crate) fn mark_finished(&self) -> bool {
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        *finished = true;
        self.cancel.is_cancelled()
    }

    /// `true` once the executor has decided the run's terminal status.
    pub fn is_finished(&self) -> bool {
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn state(ids: &[&str]) -> RunState {
        RunState::new(Uuid::new_v4(), ids.iter().copied())
    }

    #[test]
    fn all_nodes_start_pending() {
        let state = state(&["s", "a", "e"]);
        assert!(state.snapshot().values().all(|s| *s == NodeStatus::Pending));
        assert_eq!(state.status_of("a"), Some(NodeStatus::Pending));
        assert_eq!(state.status_of("ghost"), None);
    }

    #[test]
    fn legal_transitions_are_applied() {
        let state = state(&["a"]);
        state.transition("a", NodeStatus::Running).unwrap();
        state.transition("a", NodeStatus::Success).unwrap();
        assert_eq!(state.status_of("a"), Some(NodeStatus::Success));
    }

    #[test]
    fn illegal_transition_is_rejected_and_table_unchanged() {
        let state = state(&["a"]);
        let err = state.transition("a", NodeStatus::Failed).unwrap_err();
        assert!(matches!(
            err,
            EngineError::IllegalTransition { from: NodeStatus::Pending, to: NodeStatus::Failed, .. }
        ));
        assert_eq!(state.status_of("a"), Some(NodeStatus::Pending));

        state.transition("a", NodeStatus::Skipped).unwrap();
        assert!(state.transition("a", NodeStatus::Running).is_err());
    }

    #[test]
    fn unknown_node_is_rejected() {
        let state = state(&["a"]);
        assert!(matches!(
            state.transition("nope", NodeStatus::Running),
            Err(EngineError::UnknownNode(id)) if id == "nope"
        ));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let state = state(&["a"]);
        let before = state.snapshot();
        state.transition("a", NodeStatus::Running).unwrap();
        assert_eq!(before["a"], NodeStatus::Pending);
        assert_eq!(state.snapshot()["a"], NodeStatus::Running);
    }

    #[test]
    fn running_work_items_excludes_finished_nodes() {
        let state = state(&["a", "b"]);
        let (ia, ib) = (WorkItemId::new(), WorkItemId::new());
        for (node, item) in [("a", ia), ("b", ib)] {
            state.transition(node, NodeStatus::Running).unwrap();
            state.bind_work_item(node, item);
        }
        state.transition("a", NodeStatus::Success).unwrap();

        assert_eq!(state.running_work_items(), vec![("b".to_string(), ib)]);
        assert_eq!(state.work_items().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_wait_returns_immediately_when_settled() {
        let state = state(&["a", "b"]);
        state.transition("a", NodeStatus::Success).unwrap();

        state
            .wait_for_dependencies("b", &["a".into()], Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_wait_wakes_on_change() {
        let state = Arc::new(state(&["a", "b"]));
        state.transition("a", NodeStatus::Running).unwrap();

        let writer = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            writer.transition("a", NodeStatus::Failed).unwrap();
        });

        state
            .wait_for_dependencies("b", &["a".into()], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(state.status_of("a"), Some(NodeStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_wait_times_out() {
        let state = state(&["a", "b"]);
        let err = state
            .wait_for_dependencies("b", &["a".into()], Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DependencyTimeout { node_id, .. } if node_id == "b"));
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_wait_observes_cancellation() {
        let state = state(&["a", "b"]);
        state.cancel();
        let err = state
            .wait_for_dependencies("b", &["a".into()], Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(state.is_cancelled());
    }

    #[test]
    fn cancel_is_refused_once_sealed() {
        let state = state(&["a"]);
        assert!(!state.mark_finished());
        assert!(state.is_finished());
        assert!(!state.request_cancel());
        assert!(!state.is_cancelled());
    }

    #[test]
    fn cancel_accepted_before_seal_is_reported_by_seal() {
        let state = state(&["a"]);
        assert!(state.request_cancel());
        assert!(state.mark_finished());
        assert!(!state.request_cancel());
    }
}
