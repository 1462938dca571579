//! Run Service
//!
//! Registry of live runs on top of the workflow engine. Each run executes
//! on its own tokio task; the store stays the source of truth for state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use procura_models::{
    BomId, PoDraft, ProgressUpdate, ReviewDecision, ReviewRequest, RunStage, RunState, RunSummary, TaskRecord,
};
use procura_utils::{log_error, BomSource, ProcuraError, ProcuraResult};

use crate::engine::{CancelFlag, WorkflowEngine};

/// Status view of a run for external observers.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub bom_id: BomId,
    pub bom_name: String,
    pub stage: RunStage,
    pub progress: f64,
    pub step: String,
    pub error: Option<String>,
    pub summary: RunSummary,
    pub task: Option<TaskRecord>,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct RunEntry {
    cancel: CancelFlag,
    handle: Option<JoinHandle<ProcuraResult<RunState>>>,
}

impl RunEntry {
    fn is_active(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct RunService {
    engine: Arc<WorkflowEngine>,
    runs: Arc<RwLock<HashMap<Uuid, RunEntry>>>,
}

impl RunService {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.engine.reporter().subscribe()
    }

    /// Records the run and executes it in the background.
    pub async fn start(&self, bom_name: &str, source: BomSource) -> ProcuraResult<RunSnapshot> {
        // Held until the entry exists so a concurrent cancel signals the task.
        let mut runs = self.runs.write().await;

        let state = self.engine.begin(bom_name).await?;
        let run_id = state.run_id;
        let cancel = CancelFlag::new();

        let engine = self.engine.clone();
        let flag = cancel.clone();
        let initial = state.clone();
        let handle = self.spawn_run(run_id, async move { Ok(engine.execute(initial, &source, &flag).await) });
        runs.insert(
            run_id,
            RunEntry {
                cancel,
                handle: Some(handle),
            },
        );
        drop(runs);

        self.snapshot(state).await
    }

    /// Resumes a run paused for review, in the background.
    pub async fn resume(&self, run_id: Uuid) -> ProcuraResult<RunSnapshot> {
        let mut runs = self.runs.write().await;
        if runs.get(&run_id).map(RunEntry::is_active).unwrap_or(false) {
            return Err(ProcuraError::conflict(format!("Run {} is already executing", run_id)));
        }

        let state = self.load_state(run_id).await?;
        if state.stage != RunStage::AwaitingReview {
            return Err(ProcuraError::conflict(format!(
                "Run {} is {}, not awaiting review",
                run_id, state.stage
            )));
        }

        let cancel = CancelFlag::new();
        let engine = self.engine.clone();
        let flag = cancel.clone();
        let handle = self.spawn_run(run_id, async move {
            let result = engine.resume(run_id, &flag).await;
            if let Err(e) = &result {
                log_error!(e, "Resume failed", run_id = %run_id);
            }
            result
        });
        runs.insert(
            run_id,
            RunEntry {
                cancel,
                handle: Some(handle),
            },
        );
        drop(runs);

        self.snapshot(state).await
    }

    /// Cancels a run. A live task stops at its next checkpoint; a run with
    /// no live task is failed directly.
    pub async fn cancel(&self, run_id: Uuid) -> ProcuraResult<RunSnapshot> {
        let runs = self.runs.write().await;

        let state = self.load_state(run_id).await?;
        if state.is_terminal() {
            return Err(ProcuraError::conflict(format!("Run {} is already {}", run_id, state.stage)));
        }

        if let Some(entry) = runs.get(&run_id).filter(|entry| entry.is_active()) {
            entry.cancel.cancel();
            drop(runs);
            tracing::info!(run_id = %run_id, "Cancellation requested");
            return self.snapshot(state).await;
        }

        let failed = self.engine.cancel(run_id).await?;
        drop(runs);
        self.snapshot(failed).await
    }

    /// Waits for the run's background task, if any, and returns the state it
    /// left behind.
    pub async fn wait(&self, run_id: Uuid) -> ProcuraResult<RunState> {
        let handle = self
            .runs
            .write()
            .await
            .get_mut(&run_id)
            .and_then(|entry| entry.handle.take());

        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| ProcuraError::internal(format!("Run task aborted: {}", e)))?,
            None => self.load_state(run_id).await,
        }
    }

    pub async fn get(&self, run_id: Uuid) -> ProcuraResult<RunSnapshot> {
        let state = self.load_state(run_id).await?;
        self.snapshot(state).await
    }

    pub async fn list(&self) -> ProcuraResult<Vec<RunSnapshot>> {
        let states = self.engine.store().list_run_states().await?;
        let mut snapshots = Vec::with_capacity(states.len());
        for state in states {
            snapshots.push(self.snapshot(state).await?);
        }
        Ok(snapshots)
    }

    pub async fn reviews(&self, run_id: Uuid) -> ProcuraResult<Vec<ReviewRequest>> {
        self.load_state(run_id).await?;
        self.engine.store().list_review_requests(run_id).await
    }

    pub async fn resolve_review(&self, request_id: Uuid, decision: &ReviewDecision) -> ProcuraResult<ReviewRequest> {
        self.engine.resolve_review(request_id, decision).await
    }

    pub async fn purchase_orders(&self, run_id: Uuid) -> ProcuraResult<Vec<PoDraft>> {
        self.load_state(run_id).await?;
        self.engine.store().list_po_drafts(run_id).await
    }

    /// Runs `work` on its own task under a supervisor. A panic inside the
    /// work fails the run rather than leaving it in its last stage.
    fn spawn_run<F>(&self, run_id: Uuid, work: F) -> JoinHandle<ProcuraResult<RunState>>
    where
        F: Future<Output = ProcuraResult<RunState>> + Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::spawn(async move {
            match tokio::spawn(work).await {
                Ok(result) => result,
                Err(e) => {
                    let error = ProcuraError::internal(format!("Run task aborted: {}", e));
                    log_error!(error, "Run task aborted", run_id = %run_id);
                    engine.abandon(run_id, &error).await
                }
            }
        })
    }

    async fn load_state(&self, run_id: Uuid) -> ProcuraResult<RunState> {
        self.engine
            .store()
            .load_run_state(run_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(format!("Run {}", run_id)))
    }

    async fn snapshot(&self, state: RunState) -> ProcuraResult<RunSnapshot> {
        let task = self.engine.store().load_task(state.run_id).await?;
        let active = self
            .runs
            .read()
            .await
            .get(&state.run_id)
            .map(RunEntry::is_active)
            .unwrap_or(false);

        Ok(RunSnapshot {
            run_id: state.run_id,
            bom_id: state.bom_id,
            bom_name: state.bom_name,
            stage: state.stage,
            progress: state.progress,
            step: state.step,
            error: state.error,
            summary: state.summary,
            task,
            active,
            started_at: state.started_at,
            updated_at: state.updated_at,
        })
    }
}
