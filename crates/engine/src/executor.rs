//! Workflow execution engine.
//!
//! `WorkflowExecutor` drives a single run:
//! 1. Re-validates the graph and produces a topological ordering.
//! 2. Walks the order once. `start`/`end` succeed immediately; a task waits
//!    for its dependencies, is skipped unless they all succeeded, and is
//!    otherwise dispatched and polled until its work item finishes.
//! 3. After the first failure nothing else is dispatched; the rest of the
//!    walk only marks tasks downstream of a failed or skipped node `skipped`.
//! 4. Finalizes the run (`success`, `failed` or `cancelled`), records the
//!    node table on it and persists it through the [`RunStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use dispatch::{WorkDispatcher, WorkItemId, WorkPayload, WorkStatus};

use crate::dag::{dependency_map, validate_and_sort};
use crate::models::{Graph, NodeKind, NodeStatus, Run, RunStatus};
use crate::state::RunState;
use crate::store::RunStore;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long a task may wait for its dependencies to become terminal.
    pub dependency_timeout: Duration,
    /// Interval between `poll_status` calls for an in-flight work item.
    pub poll_interval: Duration,
    /// Default bound on a single work item; a payload's `timeout_secs`
    /// overrides it.
    pub work_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dependency_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(2),
            work_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Stateless orchestrator; one instance is shared by every run of a
/// [`crate::Scheduler`].
pub struct WorkflowExecutor {
    dispatcher: Arc<dyn WorkDispatcher>,
    store: Arc<dyn RunStore>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        dispatcher: Arc<dyn WorkDispatcher>,
        store: Arc<dyn RunStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self { dispatcher, store, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Drive `run` to a terminal status and persist it.
    ///
    /// Execution failures are recorded on the run, not returned. Failing to
    /// persist the final record is logged and the in-memory run is still
    /// finalized.
    ///
    /// # Errors
    /// [`EngineError::IllegalRunTransition`] if `run` was already terminal.
    #[instrument(skip_all, fields(run_id = %run.id, graph_id = %graph.id))]
    pub async fn execute(
        &self,
        graph: &Graph,
        run: &mut Run,
        state: &RunState,
    ) -> Result<RunStatus, EngineError> {
        info!(graph = %graph.name, nodes = graph.nodes.len(), "run started");

        let outcome = self.walk(graph, state).await;
        // A cancel accepted after the last node but before the seal still wins.
        let cancelled = state.mark_finished();

        let (status, message) = match outcome {
            Ok(()) if !cancelled => (RunStatus::Success, None),
            Ok(()) | Err(EngineError::Cancelled) => {
                (RunStatus::Cancelled, Some(EngineError::Cancelled.to_string()))
            }
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };

        run.node_statuses = state.snapshot();
        run.work_items = state.work_items();
        run.finish(status, message)?;

        match status {
            RunStatus::Success => info!("run succeeded"),
            RunStatus::Cancelled => warn!("run cancelled"),
            _ => error!(error = run.error_message.as_deref().unwrap_or_default(), "run failed"),
        }

        if let Err(e) = self.store.save_run(run).await {
            error!(error = %e, "failed to persist terminal run state");
        }

        Ok(status)
    }

    // -----------------------------------------------------------------------
    // Internal: the topological walk.
    // -----------------------------------------------------------------------

    async fn walk(&self, graph: &Graph, state: &RunState) -> Result<(), EngineError> {
        let order = validate_and_sort(graph)?;
        debug!(?order, "graph validated");

        let dependencies = dependency_map(graph);
        let mut failure: Option<EngineError> = None;

        for node_id in &order {
            let node = graph
                .node(node_id)
                .ok_or_else(|| EngineError::UnknownNode(node_id.clone()))?;
            let deps = dependencies.get(node_id).map(Vec::as_slice).unwrap_or_default();

            if failure.is_some() {
                if node.kind == NodeKind::Task && has_broken_dependency(state, deps) {
                    state.transition(node_id, NodeStatus::Skipped)?;
                    warn!(node_id = %node_id, "skipped after upstream failure");
                }
                continue;
            }

            if state.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let work = match (node.kind, node.work.as_ref()) {
                (NodeKind::Task, Some(work)) => work,
                (NodeKind::Task, None) => {
                    return Err(crate::error::ValidationError::MissingPayload {
                        node_id: node_id.clone(),
                    }
                    .into());
                }
                (NodeKind::Start | NodeKind::End, _) => {
                    state.transition(node_id, NodeStatus::Success)?;
                    debug!(node_id = %node_id, kind = %node.kind, "marked success");
                    continue;
                }
            };

            match state
                .wait_for_dependencies(node_id, deps, self.config.dependency_timeout)
                .await
            {
                Ok(()) => {}
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    error!(node_id = %node_id, error = %e, "dependency wait failed");
                    failure = Some(e);
                    continue;
                }
            }

            if has_unsuccessful_dependency(state, deps) {
                state.transition(node_id, NodeStatus::Skipped)?;
                warn!(node_id = %node_id, "skipped: not every dependency succeeded");
                continue;
            }

            match self.run_task(node_id, work, state).await {
                Ok(()) => {}
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => {
                    error!(node_id = %node_id, error = %e, "task failed, aborting run");
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Internal: dispatch one task and wait for its work item.
    // -----------------------------------------------------------------------

    async fn run_task(
        &self,
        node_id: &str,
        work: &WorkPayload,
        state: &RunState,
    ) -> Result<(), EngineError> {
        state.transition(node_id, NodeStatus::Running)?;

        let item = match self.dispatcher.dispatch(work).await {
            Ok(item) => item,
            Err(source) => {
                state.transition(node_id, NodeStatus::Failed)?;
                return Err(EngineError::Dispatch {
                    node_id: node_id.to_owned(),
                    source,
                });
            }
        };
        state.bind_work_item(node_id, item);
        info!(node_id, work_item = %item, name = %work.name, "work dispatched");

        let timeout = work.timeout().unwrap_or(self.config.work_timeout);

        match self.await_work(node_id, item, timeout, state).await {
            Ok(()) => {
                state.transition(node_id, NodeStatus::Success)?;
                info!(node_id, work_item = %item, "task succeeded");
                Ok(())
            }
            Err(e) => {
                if matches!(e, EngineError::Cancelled | EngineError::WorkTimeout { .. }) {
                    if let Err(cancel_err) = self.dispatcher.cancel(&item).await {
                        warn!(
                            node_id,
                            work_item = %item,
                            error = %cancel_err,
                            "failed to cancel work item"
                        );
                    }
                }
                state.transition(node_id, NodeStatus::Failed)?;
                Err(e)
            }
        }
    }

    async fn await_work(
        &self,
        node_id: &str,
        item: WorkItemId,
        timeout: Duration,
        state: &RunState,
    ) -> Result<(), EngineError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = state.cancellation().cancelled() => return Err(EngineError::Cancelled),
                _ = &mut deadline => {
                    return Err(EngineError::WorkTimeout {
                        node_id: node_id.to_owned(),
                        work_item: item,
                        waited: timeout,
                    });
                }
                _ = ticker.tick() => {}
            }

            match self.dispatcher.poll_status(&item).await {
                Ok(WorkStatus::Succeeded) => return Ok(()),
                Ok(WorkStatus::Failed { reason }) => {
                    return Err(EngineError::WorkFailed {
                        node_id: node_id.to_owned(),
                        work_item: item,
                        reason,
                    });
                }
                Ok(WorkStatus::Cancelled) => {
                    return Err(EngineError::WorkFailed {
                        node_id: node_id.to_owned(),
                        work_item: item,
                        reason: "work item was cancelled outside the run".into(),
                    });
                }
                Ok(WorkStatus::Queued | WorkStatus::Running) => {}
                Err(e) => {
                    warn!(node_id, work_item = %item, error = %e, "poll failed, will retry");
                }
            }
        }
    }
}

fn has_unsuccessful_dependency(state: &RunState, deps: &[String]) -> bool {
    deps.iter()
        .any(|dep| state.status_of(dep) != Some(NodeStatus::Success))
}

/// A dependency that failed or was skipped; pending ones do not count.
fn has_broken_dependency(state: &RunState, deps: &[String]) -> bool {
    deps.iter().any(|dep| {
        matches!(
            state.status_of(dep),
            Some(NodeStatus::Failed | NodeStatus::Skipped)
        )
    })
}
