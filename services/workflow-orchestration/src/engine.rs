//! Workflow Engine
//!
//! Drives one BOM run through its stages:
//!
//! ```text
//! parsing -> matching -> awaiting_review -> generating -> completed
//!                     \___________________/
//! ```
//!
//! Every stage change is persisted before it is reported. Any error inside
//! a stage fails the run with the error's message; writes already made stay
//! in place and are safe to re-apply.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use procura_database::Store;
use procura_models::{
    add_cost, po_number, BomTotals, ItemStatus, LineItem, PoDraft, ReviewDecision, ReviewRequest, RunStage, RunState,
};
use procura_utils::{log_error, log_stage, BomSource, BomValidator, Parser, ProcuraError, ProcuraResult};

use crate::grouping::GroupingEngine;
use crate::matching::MatchEngine;
use crate::progress::ProgressReporter;
use crate::review_gate::{GateDecision, ReviewGate};

pub const CANCELLED: &str = "Cancelled";

const PARSED_PROGRESS: f64 = 25.0;
const MATCHING_START: f64 = 30.0;
const MATCHING_SPAN: f64 = 30.0;
const MATCHED_PROGRESS: f64 = 60.0;
const GENERATING_PROGRESS: f64 = 70.0;
const GENERATED_PROGRESS: f64 = 90.0;
const COMPLETE_PROGRESS: f64 = 100.0;

/// Cooperative cancellation, observed at stage and item checkpoints.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> ProcuraResult<()> {
        if self.is_cancelled() {
            return Err(ProcuraError::Cancelled);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub confidence_threshold: f64,
    pub max_concurrent_matches: usize,
    pub po_approval_threshold: Decimal,
    pub po_number_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            max_concurrent_matches: 8,
            po_approval_threshold: Decimal::new(10_000, 0),
            po_number_prefix: "PO".to_string(),
        }
    }
}

/// How a run left the matching stage.
enum Branch {
    Paused,
    Generate,
}

/// Holds the current state of a run and commits each change to the store
/// before reporting it.
struct RunTracker {
    store: Arc<dyn Store>,
    reporter: ProgressReporter,
    state: RunState,
}

impl RunTracker {
    fn new(store: Arc<dyn Store>, reporter: ProgressReporter, state: RunState) -> Self {
        Self { store, reporter, state }
    }

    async fn advance(&mut self, stage: RunStage, progress: f64, step: impl Into<String>) -> ProcuraResult<()> {
        let next = self
            .state
            .transition(stage, progress, step)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;
        self.commit(next).await
    }

    async fn checkpoint(&mut self, progress: f64, step: impl Into<String>) -> ProcuraResult<()> {
        self.advance(self.state.stage, progress, step).await
    }

    async fn commit(&mut self, next: RunState) -> ProcuraResult<()> {
        self.store.save_run_state(&next).await?;
        self.state = next;
        log_stage!(self.state);
        self.reporter.report(&self.state).await;
        Ok(())
    }

    async fn fail(self, error: &ProcuraError) -> RunState {
        let failed = self.state.fail(error.run_message());
        log_error!(error, "Run failed", run_id = %failed.run_id, bom_id = failed.bom_id);

        if let Err(e) = self.store.save_run_state(&failed).await {
            warn!(run_id = %failed.run_id, error = %e, "Failed to persist failed run state");
        }
        self.reporter.report(&failed).await;
        failed
    }

    fn into_state(self) -> RunState {
        self.state
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    parser: Arc<dyn Parser>,
    matcher: Arc<MatchEngine>,
    gate: ReviewGate,
    grouping: GroupingEngine,
    validator: BomValidator,
    reporter: ProgressReporter,
    settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        parser: Arc<dyn Parser>,
        matcher: Arc<MatchEngine>,
        reporter: ProgressReporter,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            parser,
            matcher,
            gate: ReviewGate::new(settings.confidence_threshold),
            grouping: GroupingEngine::new(),
            validator: BomValidator::new(),
            reporter,
            settings,
        }
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Creates the BOM record and the initial `parsing` state of a new run.
    #[tracing::instrument(skip(self))]
    pub async fn begin(&self, bom_name: &str) -> ProcuraResult<RunState> {
        let bom = self.store.create_bom(bom_name).await?;
        let state = RunState::new(Uuid::new_v4(), bom.id, bom_name);

        self.store.save_run_state(&state).await?;
        log_stage!(state);
        self.reporter.report(&state).await;
        Ok(state)
    }

    /// Runs a begun run until it pauses for review or reaches a terminal
    /// stage. Failures are recorded on the returned state.
    #[tracing::instrument(skip(self, state, source, cancel), fields(run_id = %state.run_id, bom_id = state.bom_id))]
    pub async fn execute(&self, state: RunState, source: &BomSource, cancel: &CancelFlag) -> RunState {
        let mut tracker = RunTracker::new(self.store.clone(), self.reporter.clone(), state);

        match self.drive(&mut tracker, source, cancel).await {
            Ok(()) => tracker.into_state(),
            Err(e) => tracker.fail(&e).await,
        }
    }

    /// Begins and executes a run in one call.
    pub async fn start(&self, bom_name: &str, source: &BomSource, cancel: &CancelFlag) -> ProcuraResult<RunState> {
        let state = self.begin(bom_name).await?;
        Ok(self.execute(state, source, cancel).await)
    }

    /// Moves a paused run into generation. Pending review requests do not
    /// hold the run back.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn resume(&self, run_id: Uuid, cancel: &CancelFlag) -> ProcuraResult<RunState> {
        let state = self.load_state(run_id).await?;
        if state.stage != RunStage::AwaitingReview {
            return Err(ProcuraError::conflict(format!(
                "Run {} is {}, not awaiting review",
                run_id, state.stage
            )));
        }

        let mut tracker = RunTracker::new(self.store.clone(), self.reporter.clone(), state);
        let outcome = match cancel.check() {
            Ok(()) => self.generate(&mut tracker, cancel).await,
            Err(e) => Err(e),
        };

        Ok(match outcome {
            Ok(()) => tracker.into_state(),
            Err(e) => tracker.fail(&e).await,
        })
    }

    /// Fails a run that has no live task behind it, such as one paused for
    /// review.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, run_id: Uuid) -> ProcuraResult<RunState> {
        let state = self.load_state(run_id).await?;
        if state.is_terminal() {
            return Err(ProcuraError::conflict(format!("Run {} is already {}", run_id, state.stage)));
        }

        Ok(self.fail_state(state, &ProcuraError::Cancelled).await)
    }

    /// Fails a run whose task died without recording an outcome. A run that
    /// already reached a terminal stage is returned as stored.
    #[tracing::instrument(skip(self, error))]
    pub async fn abandon(&self, run_id: Uuid, error: &ProcuraError) -> ProcuraResult<RunState> {
        let state = self.load_state(run_id).await?;
        if state.is_terminal() {
            return Ok(state);
        }

        Ok(self.fail_state(state, error).await)
    }

    /// Applies an operator decision to a pending review request and its item.
    #[tracing::instrument(skip(self, decision))]
    pub async fn resolve_review(&self, request_id: Uuid, decision: &ReviewDecision) -> ProcuraResult<ReviewRequest> {
        let mut request = self
            .store
            .load_review_request(request_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(format!("Review request {}", request_id)))?;

        if !request.is_pending() {
            return Err(ProcuraError::conflict(format!(
                "Review request {} is already {}",
                request_id, request.status
            )));
        }

        if decision.approved {
            let mut item = self
                .store
                .load_items(request.run_id)
                .await?
                .into_iter()
                .find(|i| i.line_number == request.line_number)
                .ok_or_else(|| ProcuraError::not_found(format!("Line item {}", request.line_number)))?;

            item.match_result = match decision.selected_option {
                Some(option) => {
                    let chosen = request.option(option).ok_or_else(|| {
                        ProcuraError::validation("selected_option", format!("Option {} is not offered", option))
                    })?;
                    item.match_result.select(chosen)
                }
                None if item.match_result.is_match() => item.match_result.confirm_manually(),
                None => {
                    return Err(ProcuraError::validation(
                        "selected_option",
                        "Nothing to approve without a selected option",
                    ))
                }
            };
            item.transition(ItemStatus::Confirmed).map_err(ProcuraError::conflict)?;
            self.store.save_item(request.run_id, &item).await?;
        }

        request.resolve(decision);
        self.store.save_review_request(&request).await?;

        info!(
            run_id = %request.run_id,
            line_number = request.line_number,
            status = %request.status,
            "Review request resolved"
        );
        Ok(request)
    }

    async fn fail_state(&self, state: RunState, error: &ProcuraError) -> RunState {
        RunTracker::new(self.store.clone(), self.reporter.clone(), state)
            .fail(error)
            .await
    }

    async fn load_state(&self, run_id: Uuid) -> ProcuraResult<RunState> {
        self.store
            .load_run_state(run_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(format!("Run {}", run_id)))
    }

    async fn drive(&self, tracker: &mut RunTracker, source: &BomSource, cancel: &CancelFlag) -> ProcuraResult<()> {
        cancel.check()?;
        let items = self.parse(tracker, source).await?;

        cancel.check()?;
        match self.match_items(tracker, items, cancel).await? {
            Branch::Paused => Ok(()),
            Branch::Generate => {
                cancel.check()?;
                self.generate(tracker, cancel).await
            }
        }
    }

    async fn parse(&self, tracker: &mut RunTracker, source: &BomSource) -> ProcuraResult<Vec<LineItem>> {
        let parsed = self.parser.parse(source)?;
        let run_id = tracker.state.run_id;

        let validation = self.validator.validate(&parsed.items);
        let mut warnings = parsed.warnings;
        warnings.extend(validation.messages());
        for message in &warnings {
            warn!(run_id = %run_id, "{}", message);
        }

        self.store.replace_items(run_id, &parsed.items).await?;

        tracker.state.summary.parsed_items = parsed.items.len();
        tracker.state.summary.warnings = warnings;
        tracker
            .advance(
                RunStage::Matching,
                PARSED_PROGRESS,
                format!("Parsed {} items", parsed.items.len()),
            )
            .await?;

        Ok(parsed.items)
    }

    /// Matches items concurrently but writes results, review requests and
    /// progress strictly in line order.
    async fn match_items(&self, tracker: &mut RunTracker, items: Vec<LineItem>, cancel: &CancelFlag) -> ProcuraResult<Branch> {
        let run_id = tracker.state.run_id;
        let total = items.len();
        let matcher = self.matcher.as_ref();

        let mut results = stream::iter(items.into_iter().enumerate())
            .map(|(idx, item)| async move {
                let result = matcher.match_item(&item).await;
                (idx, item, result)
            })
            .buffered(self.settings.max_concurrent_matches.max(1));

        let mut decisions: Vec<GateDecision> = Vec::with_capacity(total);
        let mut totals = BomTotals {
            total_items: total,
            ..BomTotals::default()
        };

        while let Some((idx, mut item, result)) = results.next().await {
            cancel.check()?;

            let decision = self.gate.decide(&tracker.state, &item, &result);
            item.match_result = result;
            item.transition(decision.status).map_err(ProcuraError::internal)?;
            item.review_reason = decision.reason.clone();
            self.store.save_item(run_id, &item).await?;

            if let Some(request) = &decision.review {
                self.store.create_review_request(request).await?;
            }
            if item.match_result.is_match() {
                totals.matched_items += 1;
            }
            if let Some(cost) = item.extended_cost()? {
                totals.total_cost = add_cost(totals.total_cost, cost, item.line_number)?;
            }
            decisions.push(decision);

            let progress = MATCHING_START + (idx as f64 / total as f64) * MATCHING_SPAN;
            tracker
                .checkpoint(progress, format!("Matching item {}/{}", idx + 1, total))
                .await?;
        }
        drop(results);

        self.store.save_bom_totals(tracker.state.bom_id, &totals).await?;

        let review_count = decisions.iter().filter(|d| d.needs_review()).count();
        let summary = &mut tracker.state.summary;
        summary.matched_items = totals.matched_items;
        summary.unmatched_items = total - totals.matched_items;
        summary.review_requests = review_count;
        summary.total_cost = totals.total_cost;

        tracker
            .checkpoint(
                MATCHED_PROGRESS,
                format!("Matched {}/{} items", totals.matched_items, total),
            )
            .await?;

        if ReviewGate::run_needs_review(&decisions) {
            cancel.check()?;
            tracker
                .advance(
                    RunStage::AwaitingReview,
                    MATCHED_PROGRESS,
                    format!("Review {} items", review_count),
                )
                .await?;
            return Ok(Branch::Paused);
        }

        Ok(Branch::Generate)
    }

    async fn generate(&self, tracker: &mut RunTracker, cancel: &CancelFlag) -> ProcuraResult<()> {
        tracker
            .advance(RunStage::Generating, GENERATING_PROGRESS, "Generating purchase orders")
            .await?;

        let run_id = tracker.state.run_id;
        let items = self.store.load_items(run_id).await?;
        let groups = self.grouping.group(&items)?;

        for group in &groups {
            cancel.check()?;

            let sequence = self.store.next_po_sequence().await?;
            let draft = PoDraft::from_group(
                group,
                po_number(&self.settings.po_number_prefix, Utc::now(), sequence),
                run_id,
                tracker.state.bom_id,
                &tracker.state.bom_name,
                self.settings.po_approval_threshold,
            )?;
            let stored = self.store.save_po_draft(&draft).await?;

            if !stored.price_warnings.is_empty() {
                warn!(
                    run_id = %run_id,
                    po_number = %stored.po_number,
                    lines = ?stored.price_warnings,
                    "Purchase order has unpriced lines"
                );
            }
            info!(
                run_id = %run_id,
                po_number = %stored.po_number,
                supplier_id = stored.supplier_id,
                lines = stored.lines.len(),
                subtotal = %stored.subtotal,
                "Draft purchase order created"
            );

            for item in &group.items {
                let mut item = item.clone();
                item.transition(ItemStatus::Confirmed).map_err(ProcuraError::internal)?;
                self.store.save_item(run_id, &item).await?;
            }
        }

        tracker.state.summary.draft_pos = groups.len();
        let step = if groups.is_empty() {
            "No items to order".to_string()
        } else {
            format!("Created {} purchase orders", groups.len())
        };
        tracker.checkpoint(GENERATED_PROGRESS, step).await?;

        cancel.check()?;
        tracker
            .advance(RunStage::Completed, COMPLETE_PROGRESS, "Processing complete")
            .await
    }
}
