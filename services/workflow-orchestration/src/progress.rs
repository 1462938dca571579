//! Progress Reporter
//!
//! Mirrors run state changes into the task and BOM records and onto a
//! broadcast channel for live observers. Reporting never fails the run.

use std::sync::Arc;
use tokio::sync::broadcast;

use procura_database::Store;
use procura_models::{ProgressUpdate, RunState};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn Store>,
    events: broadcast::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { store, events }
    }

    /// Live progress updates across all runs.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.events.subscribe()
    }

    pub async fn report(&self, state: &RunState) {
        let update = ProgressUpdate::from_state(state);

        if let Err(e) = self.store.record_progress(&update).await {
            procura_utils::log_warn!(e, "Failed to record progress", run_id = %update.run_id, stage = %update.stage);
        }

        // No subscribers is fine.
        let _ = self.events.send(update);
    }
}
