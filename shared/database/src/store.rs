//! Persistence capability used by the workflow engine.
//!
//! Every call is its own unit of work. Writes are keyed so that re-applying
//! them after a retry leaves the same rows behind: items by (run, line),
//! review requests by (run, line) and PO drafts by (run, supplier).

use async_trait::async_trait;
use uuid::Uuid;

use procura_models::{
    BomId, BomRecord, BomTotals, LineItem, PoDraft, ProgressUpdate, ReviewRequest, RunState, TaskRecord,
};
use procura_utils::ProcuraResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the BOM header record a run reports into.
    async fn create_bom(&self, name: &str) -> ProcuraResult<BomRecord>;

    async fn load_bom(&self, bom_id: BomId) -> ProcuraResult<Option<BomRecord>>;

    async fn save_bom_totals(&self, bom_id: BomId, totals: &BomTotals) -> ProcuraResult<()>;

    async fn save_run_state(&self, state: &RunState) -> ProcuraResult<()>;

    async fn load_run_state(&self, run_id: Uuid) -> ProcuraResult<Option<RunState>>;

    async fn list_run_states(&self) -> ProcuraResult<Vec<RunState>>;

    /// Mirrors a progress write into the task and BOM records.
    async fn record_progress(&self, update: &ProgressUpdate) -> ProcuraResult<()>;

    async fn load_task(&self, run_id: Uuid) -> ProcuraResult<Option<TaskRecord>>;

    /// Replaces every item of the run in one transaction.
    async fn replace_items(&self, run_id: Uuid, items: &[LineItem]) -> ProcuraResult<()>;

    /// Items of the run ordered by line number.
    async fn load_items(&self, run_id: Uuid) -> ProcuraResult<Vec<LineItem>>;

    async fn save_item(&self, run_id: Uuid, item: &LineItem) -> ProcuraResult<()>;

    /// Inserts the request unless one already exists for its (run, line);
    /// returns the stored request either way.
    async fn create_review_request(&self, request: &ReviewRequest) -> ProcuraResult<ReviewRequest>;

    async fn load_review_request(&self, id: Uuid) -> ProcuraResult<Option<ReviewRequest>>;

    /// Requests of the run ordered by line number.
    async fn list_review_requests(&self, run_id: Uuid) -> ProcuraResult<Vec<ReviewRequest>>;

    async fn save_review_request(&self, request: &ReviewRequest) -> ProcuraResult<()>;

    async fn next_po_sequence(&self) -> ProcuraResult<u64>;

    /// Upserts by (run, supplier). An existing draft keeps its id and PO
    /// number; the stored draft is returned.
    async fn save_po_draft(&self, draft: &PoDraft) -> ProcuraResult<PoDraft>;

    /// Drafts of the run ordered by supplier id.
    async fn list_po_drafts(&self, run_id: Uuid) -> ProcuraResult<Vec<PoDraft>>;
}
