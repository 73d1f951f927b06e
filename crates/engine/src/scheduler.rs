//! Run registry and background execution.
//!
//! A [`Scheduler`] owns every in-flight run of the process: it validates and
//! records new runs, spawns one task per run, answers status and cancel
//! requests, and drains everything on shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dag::validate_and_sort;
use crate::error::{EngineError, ValidationError};
use crate::executor::WorkflowExecutor;
use crate::models::{Graph, NodeStatus, Run};
use crate::state::RunState;
use crate::store::RunStore;

type Registry = Arc<RwLock<HashMap<Uuid, Arc<RunState>>>>;

pub struct Scheduler {
    executor: Arc<WorkflowExecutor>,
    store: Arc<dyn RunStore>,
    runs: Registry,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

/// Returned by [`Scheduler::submit`]; resolves once the run is terminal.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    outcome: oneshot::Receiver<Run>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Wait for the run's terminal record.
    ///
    /// # Errors
    /// [`EngineError::Join`] if the background task ended without
    /// reporting, e.g. because it panicked.
    pub async fn wait(self) -> Result<Run, EngineError> {
        self.outcome
            .await
            .map_err(|_| EngineError::Join(format!("run {} ended without a result", self.run_id)))
    }
}

impl Scheduler {
    pub fn start(executor: Arc<WorkflowExecutor>, store: Arc<dyn RunStore>) -> Self {
        Self {
            executor,
            store,
            runs: Arc::new(RwLock::new(HashMap::new())),
            tracker: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The execution order of `graph`, without running it.
    pub fn plan(&self, graph: &Graph) -> Result<Vec<String>, ValidationError> {
        validate_and_sort(graph)
    }

    /// Validate `graph`, record a new run and start executing it.
    ///
    /// # Errors
    /// - [`EngineError::Validation`]: no run is created.
    /// - [`EngineError::ShuttingDown`] after [`Scheduler::stop_all`].
    /// - [`EngineError::Store`] if the initial record cannot be saved.
    pub async fn submit(&self, graph: Graph) -> Result<RunHandle, EngineError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }

        let order = validate_and_sort(&graph)?;

        let mut run = Run::start(graph.id);
        run.node_statuses = order.iter().map(|id| (id.clone(), NodeStatus::Pending)).collect();
        self.store.save_run(&run).await?;

        let run_id = run.id;
        let state = Arc::new(RunState::new(run_id, order));
        self.runs.write().await.insert(run_id, state.clone());
        info!(%run_id, graph_id = %graph.id, "run submitted");

        let (tx, outcome) = oneshot::channel();
        let executor = self.executor.clone();
        let runs = self.runs.clone();

        self.tracker.spawn(async move {
            if let Err(e) = executor.execute(&graph, &mut run, &state).await {
                error!(%run_id, error = %e, "run could not be finalized");
            }
            runs.write().await.remove(&run_id);
            // The caller may have dropped the handle.
            let _ = tx.send(run);
        });

        Ok(RunHandle { run_id, outcome })
    }

    /// Request cancellation of an in-flight run.
    ///
    /// Returns `false` without side effects when the run is unknown or
    /// already terminal. Once `true` is returned the run ends `cancelled`,
    /// or `failed` when a task had already failed. Repeated calls on a
    /// running run are harmless.
    pub async fn cancel(&self, run_id: Uuid) -> bool {
        let Some(state) = self.runs.read().await.get(&run_id).cloned() else {
            return false;
        };
        if !state.request_cancel() {
            return false;
        }
        info!(%run_id, "cancellation requested");
        true
    }

    /// Point-in-time copy of a run's node statuses.
    ///
    /// Live runs are read from memory; finished runs fall back to the
    /// statuses persisted on their record.
    pub async fn run_status(&self, run_id: Uuid) -> Option<BTreeMap<String, NodeStatus>> {
        let live = self.runs.read().await.get(&run_id).cloned();
        if let Some(state) = live {
            return Some(state.snapshot());
        }

        match self.store.get_run(run_id).await {
            Ok(run) => run.map(|r| r.node_statuses),
            Err(e) => {
                warn!(%run_id, error = %e, "failed to load run from store");
                None
            }
        }
    }

    /// Ids of runs that have not finished yet, sorted.
    pub async fn in_flight(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.runs.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Stop accepting runs, cancel every in-flight run and wait for their
    /// tasks to finish.
    pub async fn stop_all(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let states: Vec<Arc<RunState>> = self.runs.read().await.values().cloned().collect();
        info!(in_flight = states.len(), "stopping scheduler");
        for state in &states {
            state.request_cancel();
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!("scheduler stopped");
    }
}
