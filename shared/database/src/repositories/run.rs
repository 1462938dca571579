//! Run Repository
//!
//! PostgreSQL store for runs, tasks, BOM records, line items, review
//! requests and PO drafts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use procura_models::{
    BomId, BomRecord, BomTotals, LineItem, PoDraft, ProgressUpdate, ReviewRequest, RunState, TaskRecord,
};
use procura_utils::{ProcuraError, ProcuraResult};

use super::{enum_from_db, enum_to_db, PersistenceContext};
use crate::store::Store;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RUN_COLUMNS: &str = "run_id, bom_id, bom_name, stage, progress, step, error, summary, started_at, updated_at";
const BOM_COLUMNS: &str = "id, name, processing_status, processing_progress, processing_step, processing_error, \
                           total_items, matched_items, total_cost";
const ITEM_COLUMNS: &str = "line_number, part_number_raw, description_raw, quantity, unit_of_measure, status, \
                            match_result, review_reason";
const REVIEW_COLUMNS: &str = "id, run_id, bom_id, line_number, title, description, reason, confidence, alternatives, \
                              status, selected_option, review_notes, created_at, reviewed_at";
const DRAFT_COLUMNS: &str = "id, po_number, run_id, bom_id, source_bom_name, supplier_id, supplier_name, status, \
                             auto_generated, lines, subtotal, total, requires_approval, price_warnings, created_at";

#[async_trait]
impl Store for PgStore {
    async fn create_bom(&self, name: &str) -> ProcuraResult<BomRecord> {
        let row: BomRow = sqlx::query_as(&format!(
            "INSERT INTO boms (name) VALUES ($1) RETURNING {}",
            BOM_COLUMNS
        ))
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .persistence_context("Failed to create BOM")?;

        row.try_into()
    }

    async fn load_bom(&self, bom_id: BomId) -> ProcuraResult<Option<BomRecord>> {
        let row: Option<BomRow> = sqlx::query_as(&format!("SELECT {} FROM boms WHERE id = $1", BOM_COLUMNS))
            .bind(bom_id)
            .fetch_optional(&self.pool)
            .await
            .persistence_context("Failed to fetch BOM")?;

        row.map(TryInto::try_into).transpose()
    }

    async fn save_bom_totals(&self, bom_id: BomId, totals: &BomTotals) -> ProcuraResult<()> {
        let result = sqlx::query(
            "UPDATE boms SET total_items = $2, matched_items = $3, total_cost = $4 WHERE id = $1",
        )
        .bind(bom_id)
        .bind(totals.total_items as i32)
        .bind(totals.matched_items as i32)
        .bind(totals.total_cost)
        .execute(&self.pool)
        .await
        .persistence_context("Failed to update BOM totals")?;

        if result.rows_affected() == 0 {
            return Err(ProcuraError::not_found(format!("BOM {}", bom_id)));
        }
        Ok(())
    }

    async fn save_run_state(&self, state: &RunState) -> ProcuraResult<()> {
        let summary = serde_json::to_value(&state.summary)?;

        sqlx::query(
            r#"
            INSERT INTO procurement_runs
                (run_id, bom_id, bom_name, stage, progress, step, error, summary, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (run_id) DO UPDATE SET
                stage = EXCLUDED.stage,
                progress = EXCLUDED.progress,
                step = EXCLUDED.step,
                error = EXCLUDED.error,
                summary = EXCLUDED.summary,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.run_id)
        .bind(state.bom_id)
        .bind(&state.bom_name)
        .bind(state.stage.to_string())
        .bind(state.progress)
        .bind(&state.step)
        .bind(&state.error)
        .bind(&summary)
        .bind(state.started_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .persistence_context("Failed to save run state")?;

        Ok(())
    }

    async fn load_run_state(&self, run_id: Uuid) -> ProcuraResult<Option<RunState>> {
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM procurement_runs WHERE run_id = $1",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .persistence_context("Failed to fetch run")?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_run_states(&self) -> ProcuraResult<Vec<RunState>> {
        let rows: Vec<RunRow> = sqlx::query_as(&format!(
            "SELECT {} FROM procurement_runs ORDER BY started_at DESC",
            RUN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .persistence_context("Failed to list runs")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_progress(&self, update: &ProgressUpdate) -> ProcuraResult<()> {
        let output = update.summary.as_ref().map(serde_json::to_value).transpose()?;
        let completed_at = update.stage.is_terminal().then_some(update.at);

        let mut tx = self.pool.begin().await.persistence_context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO agent_tasks
                (run_id, status, progress, current_step, current_agent, error_message, output, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (run_id) DO UPDATE SET
                status = EXCLUDED.status,
                progress = EXCLUDED.progress,
                current_step = EXCLUDED.current_step,
                current_agent = EXCLUDED.current_agent,
                error_message = EXCLUDED.error_message,
                output = COALESCE(EXCLUDED.output, agent_tasks.output),
                completed_at = COALESCE(EXCLUDED.completed_at, agent_tasks.completed_at)
            "#,
        )
        .bind(update.run_id)
        .bind(update.task_status.to_string())
        .bind(update.progress)
        .bind(&update.step)
        .bind(update.agent.to_string())
        .bind(&update.error)
        .bind(&output)
        .bind(update.at)
        .bind(completed_at)
        .execute(&mut *tx)
        .await
        .persistence_context("Failed to update task record")?;

        sqlx::query(
            r#"
            UPDATE boms SET
                processing_status = $2,
                processing_progress = $3,
                processing_step = $4,
                processing_error = $5
            WHERE id = $1
            "#,
        )
        .bind(update.bom_id)
        .bind(update.stage.to_string())
        .bind(update.progress)
        .bind(&update.step)
        .bind(&update.error)
        .execute(&mut *tx)
        .await
        .persistence_context("Failed to update BOM progress")?;

        tx.commit().await.persistence_context("Failed to commit progress")?;
        Ok(())
    }

    async fn load_task(&self, run_id: Uuid) -> ProcuraResult<Option<TaskRecord>> {
        let row: Option<TaskRow> = sqlx::query_as(
            r#"
            SELECT run_id, status, progress, current_step, current_agent, error_message, output,
                   started_at, completed_at
            FROM agent_tasks
            WHERE run_id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .persistence_context("Failed to fetch task")?;

        row.map(TryInto::try_into).transpose()
    }

    async fn replace_items(&self, run_id: Uuid, items: &[LineItem]) -> ProcuraResult<()> {
        let mut tx = self.pool.begin().await.persistence_context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM bom_items WHERE run_id = $1")
            .bind(run_id)
            .execute(&mut *tx)
            .await
            .persistence_context("Failed to clear line items")?;

        for item in items {
            insert_item(&mut tx, run_id, item).await?;
        }

        tx.commit().await.persistence_context("Failed to commit line items")?;
        Ok(())
    }

    async fn load_items(&self, run_id: Uuid) -> ProcuraResult<Vec<LineItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {} FROM bom_items WHERE run_id = $1 ORDER BY line_number",
            ITEM_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .persistence_context("Failed to fetch line items")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_item(&self, run_id: Uuid, item: &LineItem) -> ProcuraResult<()> {
        let mut tx = self.pool.begin().await.persistence_context("Failed to begin transaction")?;
        insert_item(&mut tx, run_id, item).await?;
        tx.commit().await.persistence_context("Failed to commit line item")?;
        Ok(())
    }

    async fn create_review_request(&self, request: &ReviewRequest) -> ProcuraResult<ReviewRequest> {
        let alternatives = serde_json::to_value(&request.alternatives)?;

        sqlx::query(
            r#"
            INSERT INTO approval_requests
                (id, run_id, bom_id, line_number, title, description, reason, confidence, alternatives,
                 status, selected_option, review_notes, created_at, reviewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (run_id, line_number) DO NOTHING
            "#,
        )
        .bind(request.id)
        .bind(request.run_id)
        .bind(request.bom_id)
        .bind(request.line_number as i32)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.reason)
        .bind(request.confidence)
        .bind(&alternatives)
        .bind(enum_to_db(&request.status)?)
        .bind(request.selected_option.map(|o| o as i32))
        .bind(&request.review_notes)
        .bind(request.created_at)
        .bind(request.reviewed_at)
        .execute(&self.pool)
        .await
        .persistence_context("Failed to create review request")?;

        let row: ReviewRow = sqlx::query_as(&format!(
            "SELECT {} FROM approval_requests WHERE run_id = $1 AND line_number = $2",
            REVIEW_COLUMNS
        ))
        .bind(request.run_id)
        .bind(request.line_number as i32)
        .fetch_one(&self.pool)
        .await
        .persistence_context("Failed to fetch review request")?;

        row.try_into()
    }

    async fn load_review_request(&self, id: Uuid) -> ProcuraResult<Option<ReviewRequest>> {
        let row: Option<ReviewRow> = sqlx::query_as(&format!(
            "SELECT {} FROM approval_requests WHERE id = $1",
            REVIEW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .persistence_context("Failed to fetch review request")?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_review_requests(&self, run_id: Uuid) -> ProcuraResult<Vec<ReviewRequest>> {
        let rows: Vec<ReviewRow> = sqlx::query_as(&format!(
            "SELECT {} FROM approval_requests WHERE run_id = $1 ORDER BY line_number",
            REVIEW_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .persistence_context("Failed to list review requests")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_review_request(&self, request: &ReviewRequest) -> ProcuraResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE approval_requests
            SET status = $2, selected_option = $3, review_notes = $4, reviewed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(request.id)
        .bind(enum_to_db(&request.status)?)
        .bind(request.selected_option.map(|o| o as i32))
        .bind(&request.review_notes)
        .bind(request.reviewed_at)
        .execute(&self.pool)
        .await
        .persistence_context("Failed to update review request")?;

        if result.rows_affected() == 0 {
            return Err(ProcuraError::not_found(format!("Review request {}", request.id)));
        }
        Ok(())
    }

    async fn next_po_sequence(&self) -> ProcuraResult<u64> {
        let (value,): (i64,) = sqlx::query_as("SELECT nextval('po_number_seq')")
            .fetch_one(&self.pool)
            .await
            .persistence_context("Failed to allocate PO number")?;

        Ok(value as u64)
    }

    async fn save_po_draft(&self, draft: &PoDraft) -> ProcuraResult<PoDraft> {
        let lines = serde_json::to_value(&draft.lines)?;
        let price_warnings = serde_json::to_value(&draft.price_warnings)?;

        let row: DraftRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO purchase_orders
                (id, po_number, run_id, bom_id, source_bom_name, supplier_id, supplier_name, status,
                 auto_generated, lines, subtotal, total, requires_approval, price_warnings, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (run_id, supplier_id) DO UPDATE SET
                lines = EXCLUDED.lines,
                subtotal = EXCLUDED.subtotal,
                total = EXCLUDED.total,
                requires_approval = EXCLUDED.requires_approval,
                price_warnings = EXCLUDED.price_warnings
            RETURNING {}
            "#,
            DRAFT_COLUMNS
        ))
        .bind(draft.id)
        .bind(&draft.po_number)
        .bind(draft.run_id)
        .bind(draft.bom_id)
        .bind(&draft.source_bom_name)
        .bind(draft.supplier_id)
        .bind(&draft.supplier_name)
        .bind(enum_to_db(&draft.status)?)
        .bind(draft.auto_generated)
        .bind(&lines)
        .bind(draft.subtotal)
        .bind(draft.total)
        .bind(draft.requires_approval)
        .bind(&price_warnings)
        .bind(draft.created_at)
        .fetch_one(&self.pool)
        .await
        .persistence_context("Failed to save PO draft")?;

        row.try_into()
    }

    async fn list_po_drafts(&self, run_id: Uuid) -> ProcuraResult<Vec<PoDraft>> {
        let rows: Vec<DraftRow> = sqlx::query_as(&format!(
            "SELECT {} FROM purchase_orders WHERE run_id = $1 ORDER BY supplier_id",
            DRAFT_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .persistence_context("Failed to list PO drafts")?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    item: &LineItem,
) -> ProcuraResult<()> {
    let match_result = serde_json::to_value(&item.match_result)?;

    sqlx::query(
        r#"
        INSERT INTO bom_items
            (run_id, line_number, part_number_raw, description_raw, quantity, unit_of_measure, status,
             match_result, review_reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (run_id, line_number) DO UPDATE SET
            status = EXCLUDED.status,
            match_result = EXCLUDED.match_result,
            review_reason = EXCLUDED.review_reason
        "#,
    )
    .bind(run_id)
    .bind(item.line_number as i32)
    .bind(&item.part_number_raw)
    .bind(&item.description_raw)
    .bind(item.quantity)
    .bind(&item.unit_of_measure)
    .bind(item.status.to_string())
    .bind(&match_result)
    .bind(&item.review_reason)
    .execute(&mut **tx)
    .await
    .persistence_context("Failed to save line item")?;

    Ok(())
}

#[derive(Debug, FromRow)]
struct RunRow {
    run_id: Uuid,
    bom_id: i64,
    bom_name: String,
    stage: String,
    progress: f64,
    step: String,
    error: Option<String>,
    summary: serde_json::Value,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RunState {
    type Error = ProcuraError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: row.run_id,
            bom_id: row.bom_id,
            bom_name: row.bom_name,
            stage: enum_from_db(&row.stage)?,
            progress: row.progress,
            step: row.step,
            error: row.error,
            summary: serde_json::from_value(row.summary)?,
            started_at: row.started_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct TaskRow {
    run_id: Uuid,
    status: String,
    progress: f64,
    current_step: String,
    current_agent: String,
    error_message: Option<String>,
    output: Option<serde_json::Value>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = ProcuraError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: row.run_id,
            status: enum_from_db(&row.status)?,
            progress: row.progress,
            current_step: row.current_step,
            current_agent: enum_from_db(&row.current_agent)?,
            error_message: row.error_message,
            output: row.output.map(serde_json::from_value).transpose()?,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BomRow {
    id: i64,
    name: String,
    processing_status: String,
    processing_progress: f64,
    processing_step: Option<String>,
    processing_error: Option<String>,
    total_items: i32,
    matched_items: i32,
    total_cost: Decimal,
}

impl TryFrom<BomRow> for BomRecord {
    type Error = ProcuraError;

    fn try_from(row: BomRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            processing_status: enum_from_db(&row.processing_status)?,
            processing_progress: row.processing_progress,
            processing_step: row.processing_step,
            processing_error: row.processing_error,
            total_items: row.total_items.max(0) as usize,
            matched_items: row.matched_items.max(0) as usize,
            total_cost: row.total_cost,
        })
    }
}

#[derive(Debug, FromRow)]
struct ItemRow {
    line_number: i32,
    part_number_raw: Option<String>,
    description_raw: Option<String>,
    quantity: Decimal,
    unit_of_measure: String,
    status: String,
    match_result: serde_json::Value,
    review_reason: Option<String>,
}

impl TryFrom<ItemRow> for LineItem {
    type Error = ProcuraError;

    fn try_from(row: ItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            line_number: row.line_number as u32,
            part_number_raw: row.part_number_raw,
            description_raw: row.description_raw,
            quantity: row.quantity,
            unit_of_measure: row.unit_of_measure,
            status: enum_from_db(&row.status)?,
            match_result: serde_json::from_value(row.match_result)?,
            review_reason: row.review_reason,
        })
    }
}

#[derive(Debug, FromRow)]
struct ReviewRow {
    id: Uuid,
    run_id: Uuid,
    bom_id: i64,
    line_number: i32,
    title: String,
    description: String,
    reason: String,
    confidence: f64,
    alternatives: serde_json::Value,
    status: String,
    selected_option: Option<i32>,
    review_notes: Option<String>,
    created_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ReviewRow> for ReviewRequest {
    type Error = ProcuraError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            run_id: row.run_id,
            bom_id: row.bom_id,
            line_number: row.line_number as u32,
            title: row.title,
            description: row.description,
            reason: row.reason,
            confidence: row.confidence,
            alternatives: serde_json::from_value(row.alternatives)?,
            status: enum_from_db(&row.status)?,
            selected_option: row.selected_option.map(|o| o as usize),
            review_notes: row.review_notes,
            created_at: row.created_at,
            reviewed_at: row.reviewed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DraftRow {
    id: Uuid,
    po_number: String,
    run_id: Uuid,
    bom_id: i64,
    source_bom_name: String,
    supplier_id: i64,
    supplier_name: String,
    status: String,
    auto_generated: bool,
    lines: serde_json::Value,
    subtotal: Decimal,
    total: Decimal,
    requires_approval: bool,
    price_warnings: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<DraftRow> for PoDraft {
    type Error = ProcuraError;

    fn try_from(row: DraftRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            po_number: row.po_number,
            run_id: row.run_id,
            bom_id: row.bom_id,
            source_bom_name: row.source_bom_name,
            supplier_id: row.supplier_id,
            supplier_name: row.supplier_name,
            status: enum_from_db(&row.status)?,
            auto_generated: row.auto_generated,
            lines: serde_json::from_value(row.lines)?,
            subtotal: row.subtotal,
            total: row.total,
            requires_approval: row.requires_approval,
            price_warnings: serde_json::from_value(row.price_warnings)?,
            created_at: row.created_at,
        })
    }
}
