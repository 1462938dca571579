//! End-to-end runs against the in-memory store and catalog.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use procura_database::{
    CatalogSearch, Embedder, EmbeddingSearch, MemoryCatalog, MemoryStore, Store,
};
use procura_models::{
    BomId, BomRecord, BomTotals, CatalogOffer, ItemStatus, LineItem, MatchMethod, Part, PoDraft, ProgressUpdate,
    ReviewDecision, ReviewRequest, ReviewStatus, RunStage, RunState, Supplier, SupplierPart, TaskRecord,
    TaskStatus,
};
use procura_utils::{AppConfig, BomParser, BomSource, ProcuraError, ProcuraResult};
use procura_workflow::{
    build_service, CancelFlag, EngineSettings, MatchEngine, MatchSettings, ProgressReporter, ReviewGate,
    RunService, WorkflowEngine, CANCELLED,
};

// ===== Fixtures =====

/// Every text embeds to the same unit vector, so a part's similarity is the
/// first component of its own unit embedding.
struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> ProcuraResult<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

fn unit(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt()]
}

fn offer(id: i64, supplier_id: i64, part_id: i64, cents: i64) -> SupplierPart {
    SupplierPart {
        id,
        supplier_id,
        part_id,
        supplier_part_number: None,
        unit_price: Some(Decimal::new(cents, 2)),
        lead_time_days: None,
        min_order_qty: 1,
        is_preferred: false,
    }
}

fn catalog(with_embedder: bool) -> MemoryCatalog {
    let mut capacitor = Part::new(3, "CAP-10UF", "Ceramic capacitor");
    capacitor.description = Some("Ceramic capacitor 10uF 16V".to_string());
    capacitor.description_embedding = Some(unit(0.62));

    let mut tantalum = Part::new(6, "TAN-10UF", "Tantalum capacitor");
    tantalum.description_embedding = Some(unit(0.55));

    let mut resistor = Part::new(7, "RES-10K", "Resistor");
    resistor.description_embedding = Some(unit(0.3));

    let mut catalog = MemoryCatalog::new();
    catalog
        .add_supplier(Supplier::new(5, "Acme Components"))
        .add_supplier(Supplier::new(9, "Northwind Electronics"))
        .add_part(Part::new(1, "ABC123", "Widget"))
        .add_part(Part::new(2, "XYZ-9", "Gadget"))
        .add_part(capacitor)
        .add_part(Part::new(4, "DEF456", "Bracket"))
        .add_part(tantalum)
        .add_part(resistor)
        .add_offer(offer(501, 5, 1, 250))
        .add_offer(offer(901, 9, 2, 1000))
        .add_offer(offer(502, 5, 3, 10))
        .add_offer(offer(503, 5, 4, 100))
        .add_offer(offer(902, 9, 6, 45))
        .add_offer(offer(504, 5, 7, 1));

    if with_embedder {
        catalog = catalog.with_embedder(Arc::new(FixedEmbedder));
    }
    catalog
}

fn matcher(catalog: MemoryCatalog) -> Arc<MatchEngine> {
    let catalog = Arc::new(catalog);
    Arc::new(MatchEngine::new(catalog.clone(), catalog, MatchSettings::default()))
}

fn engine_with(store: Arc<dyn Store>, matcher: Arc<MatchEngine>) -> WorkflowEngine {
    engine_with_concurrency(store, matcher, EngineSettings::default().max_concurrent_matches)
}

fn engine_with_concurrency(store: Arc<dyn Store>, matcher: Arc<MatchEngine>, max_concurrent_matches: usize) -> WorkflowEngine {
    WorkflowEngine::new(
        store.clone(),
        Arc::new(BomParser::new().unwrap()),
        matcher,
        ProgressReporter::new(store),
        EngineSettings {
            max_concurrent_matches,
            ..EngineSettings::default()
        },
    )
}

fn setup() -> (Arc<MemoryStore>, WorkflowEngine) {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), matcher(catalog(true)));
    (store, engine)
}

const AUTO_BOM: &[u8] = b"Part Number,Description,Qty\nABC-123,Widget,10\nXYZ-9,Gadget,1\nDEF456,Bracket,4\n";
const REVIEW_BOM: &[u8] = b"Part Number,Description,Qty\nABC-123,Widget,10\n,10uF capacitor,2\n";

fn csv(bytes: &[u8]) -> BomSource {
    BomSource::new("bom.csv", bytes.to_vec())
}

fn assert_monotonic(history: &[ProgressUpdate]) {
    assert!(!history.is_empty());
    for pair in history.windows(2) {
        assert!(
            pair[1].progress >= pair[0].progress,
            "progress moved backward: {} -> {}",
            pair[0].progress,
            pair[1].progress
        );
    }
}

// ===== Matching =====

#[tokio::test]
async fn test_exact_match_after_normalization() {
    let matcher = matcher(catalog(true));
    let item = LineItem::new(1, Decimal::new(10, 0)).with_part_number("ABC-123");

    let result = matcher.match_item(&item).await;
    let best = result.best.unwrap();
    assert_eq!(best.confidence, 1.0);
    assert_eq!(best.method, MatchMethod::Exact);
    assert_eq!(best.supplier_id, 5);
    assert_eq!(best.unit_price, Some(Decimal::new(250, 2)));
}

#[tokio::test]
async fn test_fuzzy_match_on_containment() {
    let matcher = matcher(catalog(true));
    let item = LineItem::new(1, Decimal::ONE).with_part_number("abc 123-r");

    let best = matcher.match_item(&item).await.best.unwrap();
    assert_eq!(best.confidence, 0.85);
    assert_eq!(best.method, MatchMethod::Fuzzy);
    assert_eq!(best.supplier_part_id, Some(501));
}

#[tokio::test]
async fn test_semantic_match_below_threshold_needs_review() {
    let matcher = matcher(catalog(true));
    let item = LineItem::new(2, Decimal::new(2, 0)).with_description("10uF capacitor");

    let result = matcher.match_item(&item).await;
    let best = result.best.clone().unwrap();
    assert_eq!(best.method, MatchMethod::Semantic);
    assert_eq!(best.supplier_part_id, Some(502));
    assert!((best.confidence - 0.62).abs() < 1e-6);
    assert_eq!(result.alternatives.len(), 1);
    assert_eq!(result.alternatives[0].supplier_id, 9);

    let state = RunState::new(Uuid::new_v4(), 1, "Scenario");
    let decision = ReviewGate::new(0.8).decide(&state, &item, &result);
    assert_eq!(decision.status, ItemStatus::NeedsReview);
    assert!(decision.reason.unwrap().contains("62%"));
}

#[tokio::test]
async fn test_missing_embedder_degrades_to_no_match() {
    let matcher = matcher(catalog(false));
    let item = LineItem::new(1, Decimal::ONE).with_description("10uF capacitor");

    let result = matcher.match_item(&item).await;
    assert!(result.best.is_none());
    assert!(result.alternatives.is_empty());
}

struct DownCatalog;

#[async_trait]
impl CatalogSearch for DownCatalog {
    async fn by_part_number(&self, _normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        Err(ProcuraError::persistence("connection refused"))
    }

    async fn by_part_number_fragment(&self, _normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        Err(ProcuraError::persistence("connection refused"))
    }
}

#[tokio::test]
async fn test_failed_part_number_search_falls_through_to_semantic() {
    let embeddings: Arc<dyn EmbeddingSearch> = Arc::new(catalog(true));
    let matcher = MatchEngine::new(Arc::new(DownCatalog), embeddings, MatchSettings::default());
    let item = LineItem::new(1, Decimal::ONE)
        .with_part_number("CAP-10UF")
        .with_description("10uF capacitor");

    let best = matcher.match_item(&item).await.best.unwrap();
    assert_eq!(best.method, MatchMethod::Semantic);
}

// ===== Runs =====

#[tokio::test]
async fn test_auto_matched_run_skips_review() {
    let (store, engine) = setup();

    let state = engine.start("Rover BOM", &csv(AUTO_BOM), &CancelFlag::new()).await.unwrap();
    assert_eq!(state.stage, RunStage::Completed);
    assert_eq!(state.progress, 100.0);
    assert_eq!(state.summary.parsed_items, 3);
    assert_eq!(state.summary.matched_items, 3);
    assert_eq!(state.summary.draft_pos, 2);

    let history = store.progress_history(state.run_id).await;
    assert_monotonic(&history);
    assert!(history.iter().all(|u| u.stage != RunStage::AwaitingReview));
    let steps: Vec<&str> = history.iter().map(|u| u.step.as_str()).collect();
    assert!(steps.contains(&"Parsed 3 items"));
    assert!(steps.contains(&"Matched 3/3 items"));
    assert!(steps.contains(&"Created 2 purchase orders"));
    assert_eq!(steps.last(), Some(&"Processing complete"));

    let drafts = store.list_po_drafts(state.run_id).await.unwrap();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].supplier_id, 5);
    assert_eq!(drafts[0].lines.len(), 2);
    assert_eq!(drafts[0].subtotal, Decimal::new(2900, 2));
    assert_eq!(drafts[0].total, drafts[0].subtotal);
    assert!(!drafts[0].requires_approval);
    assert!(drafts[0].auto_generated);
    assert!(drafts[0].po_number.starts_with("PO-"));
    assert_eq!(drafts[1].supplier_id, 9);
    assert_eq!(drafts[1].lines.len(), 1);

    let items = store.load_items(state.run_id).await.unwrap();
    assert!(items.iter().all(|i| i.status == ItemStatus::Confirmed));

    let bom = store.load_bom(state.bom_id).await.unwrap().unwrap();
    assert_eq!(bom.processing_status, RunStage::Completed);
    assert_eq!(bom.matched_items, 3);
    assert_eq!(bom.total_cost, Decimal::new(3900, 2));

    let task = store.load_task(state.run_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());
    assert_eq!(task.output.unwrap().draft_pos, 2);
}

#[tokio::test]
async fn test_decode_failure_fails_run_without_items() {
    let (store, engine) = setup();

    let source = BomSource::new("bom.pdf", b"%PDF-1.7".to_vec());
    let state = engine.start("Broken", &source, &CancelFlag::new()).await.unwrap();

    assert_eq!(state.stage, RunStage::Failed);
    assert_eq!(state.progress, 0.0);
    assert!(state.error.unwrap().starts_with("Decode error"));
    assert!(store.load_items(state.run_id).await.unwrap().is_empty());
    assert!(store.progress_history(state.run_id).await.iter().all(|u| u.progress == 0.0));
}

#[tokio::test]
async fn test_low_confidence_item_pauses_run() {
    let (store, engine) = setup();

    let state = engine.start("Review BOM", &csv(REVIEW_BOM), &CancelFlag::new()).await.unwrap();
    assert_eq!(state.stage, RunStage::AwaitingReview);
    assert_eq!(state.progress, 60.0);
    assert_eq!(state.step, "Review 1 items");

    let reviews = store.list_review_requests(state.run_id).await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].line_number, 2);
    assert_eq!(reviews[0].reason, "Low confidence match (62%)");
    assert_eq!(reviews[0].title, "Review match: 10uF capacitor");

    let task = store.load_task(state.run_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Paused);

    let items = store.load_items(state.run_id).await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Matched);
    assert_eq!(items[1].status, ItemStatus::NeedsReview);
    assert!(store.list_po_drafts(state.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_approved_alternative_is_ordered_after_resume() {
    let (store, engine) = setup();
    let paused = engine.start("Review BOM", &csv(REVIEW_BOM), &CancelFlag::new()).await.unwrap();
    let request = store.list_review_requests(paused.run_id).await.unwrap().remove(0);

    let decision = ReviewDecision {
        approved: true,
        selected_option: Some(0),
        notes: Some("Tantalum is fine".to_string()),
    };
    let resolved = engine.resolve_review(request.id, &decision).await.unwrap();
    assert_eq!(resolved.status, ReviewStatus::Approved);
    assert_eq!(resolved.selected_option, Some(0));

    let item = store.load_items(paused.run_id).await.unwrap().remove(1);
    assert_eq!(item.status, ItemStatus::Confirmed);
    let best = item.match_result.best.unwrap();
    assert_eq!(best.supplier_id, 9);
    assert_eq!(best.method, MatchMethod::Manual);

    let done = engine.resume(paused.run_id, &CancelFlag::new()).await.unwrap();
    assert_eq!(done.stage, RunStage::Completed);
    assert_monotonic(&store.progress_history(paused.run_id).await);

    let drafts = store.list_po_drafts(paused.run_id).await.unwrap();
    assert_eq!(drafts.iter().map(|d| d.supplier_id).collect::<Vec<_>>(), vec![5, 9]);
    assert_eq!(drafts[1].subtotal, Decimal::new(90, 2));
}

#[tokio::test]
async fn test_review_resolves_exactly_once() {
    let (store, engine) = setup();
    let paused = engine.start("Review BOM", &csv(REVIEW_BOM), &CancelFlag::new()).await.unwrap();
    let request = store.list_review_requests(paused.run_id).await.unwrap().remove(0);

    let reject = ReviewDecision {
        approved: false,
        ..Default::default()
    };
    engine.resolve_review(request.id, &reject).await.unwrap();

    let err = engine.resolve_review(request.id, &reject).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Conflict { .. }));

    let item = store.load_items(paused.run_id).await.unwrap().remove(1);
    assert_eq!(item.status, ItemStatus::NeedsReview);
}

#[tokio::test]
async fn test_resume_ignores_pending_reviews() {
    let (store, engine) = setup();
    let paused = engine.start("Review BOM", &csv(REVIEW_BOM), &CancelFlag::new()).await.unwrap();

    let done = engine.resume(paused.run_id, &CancelFlag::new()).await.unwrap();
    assert_eq!(done.stage, RunStage::Completed);

    let drafts = store.list_po_drafts(paused.run_id).await.unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].lines.len(), 1);
    assert_eq!(drafts[0].lines[0].bom_line_number, 1);

    let reviews = store.list_review_requests(paused.run_id).await.unwrap();
    assert!(reviews[0].is_pending());

    let err = engine.resume(paused.run_id, &CancelFlag::new()).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Conflict { .. }));
}

#[tokio::test]
async fn test_nothing_to_order_still_completes() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(store.clone(), matcher(catalog(false)));
    let bom = b"Part Number,Description,Qty\nNOPE-1,Unknown thing,1\n";
    let paused = engine.start("Orphans", &csv(bom), &CancelFlag::new()).await.unwrap();
    assert_eq!(paused.stage, RunStage::AwaitingReview);

    let request = store.list_review_requests(paused.run_id).await.unwrap().remove(0);
    assert_eq!(request.reason, "No supplier match found");
    assert!(request.alternatives.is_empty());

    let approve_nothing = ReviewDecision {
        approved: true,
        ..Default::default()
    };
    let err = engine.resolve_review(request.id, &approve_nothing).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Validation { .. }));

    let done = engine.resume(paused.run_id, &CancelFlag::new()).await.unwrap();
    assert_eq!(done.stage, RunStage::Completed);
    assert_eq!(done.summary.draft_pos, 0);
    let steps: Vec<String> = store
        .progress_history(paused.run_id)
        .await
        .into_iter()
        .map(|u| u.step)
        .collect();
    assert!(steps.iter().any(|s| s == "No items to order"));
}

// ===== Cancellation =====

#[tokio::test]
async fn test_cancelled_before_parsing() {
    let (store, engine) = setup();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let state = engine.start("Rover BOM", &csv(AUTO_BOM), &cancel).await.unwrap();
    assert_eq!(state.stage, RunStage::Failed);
    assert_eq!(state.error.as_deref(), Some(CANCELLED));
    assert!(store.load_items(state.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_paused_run() {
    let (store, engine) = setup();
    let paused = engine.start("Review BOM", &csv(REVIEW_BOM), &CancelFlag::new()).await.unwrap();

    let cancelled = engine.cancel(paused.run_id).await.unwrap();
    assert_eq!(cancelled.stage, RunStage::Failed);
    assert_eq!(cancelled.error.as_deref(), Some(CANCELLED));
    assert_eq!(cancelled.progress, 60.0);

    let task = store.load_task(paused.run_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    let err = engine.cancel(paused.run_id).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Conflict { .. }));
}

/// Wraps a catalog, delaying exact lookups per part number and recording the
/// order in which they finish.
struct SlowCatalog {
    inner: MemoryCatalog,
    delays_ms: HashMap<&'static str, u64>,
    finished: Mutex<Vec<String>>,
}

#[async_trait]
impl CatalogSearch for SlowCatalog {
    async fn by_part_number(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        if let Some(ms) = self.delays_ms.get(normalized) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        self.finished.lock().unwrap().push(normalized.to_string());
        self.inner.by_part_number(normalized).await
    }

    async fn by_part_number_fragment(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        self.inner.by_part_number_fragment(normalized).await
    }
}

#[tokio::test]
async fn test_concurrent_matching_keeps_line_order() {
    let slow = Arc::new(SlowCatalog {
        inner: catalog(false),
        delays_ms: HashMap::from([("ABC123", 120), ("XYZ9", 60), ("DEF456", 0)]),
        finished: Mutex::new(Vec::new()),
    });
    let embeddings: Arc<dyn EmbeddingSearch> = Arc::new(catalog(false));
    let matcher = Arc::new(MatchEngine::new(slow.clone(), embeddings, MatchSettings::default()));
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with_concurrency(store.clone(), matcher, 4);

    let state = engine.start("Rover BOM", &csv(AUTO_BOM), &CancelFlag::new()).await.unwrap();
    assert_eq!(state.stage, RunStage::Completed);

    // Later lines finished their lookups first.
    assert_eq!(*slow.finished.lock().unwrap(), vec!["DEF456", "XYZ9", "ABC123"]);

    let items = store.load_items(state.run_id).await.unwrap();
    let lines: Vec<(u32, Option<&str>)> = items
        .iter()
        .map(|i| (i.line_number, i.part_number_raw.as_deref()))
        .collect();
    assert_eq!(lines, vec![(1, Some("ABC-123")), (2, Some("XYZ-9")), (3, Some("DEF456"))]);

    let history = store.progress_history(state.run_id).await;
    assert_monotonic(&history);
    let matching: Vec<&str> = history
        .iter()
        .map(|u| u.step.as_str())
        .filter(|s| s.starts_with("Matching item"))
        .collect();
    assert_eq!(matching, vec!["Matching item 1/3", "Matching item 2/3", "Matching item 3/3"]);
}

/// Holds the lookup for one part number until released, signalling when it
/// is reached.
struct GatedCatalog {
    inner: MemoryCatalog,
    gate: &'static str,
    reached: Notify,
    release: Notify,
}

#[async_trait]
impl CatalogSearch for GatedCatalog {
    async fn by_part_number(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        if normalized == self.gate {
            self.reached.notify_one();
            self.release.notified().await;
        }
        self.inner.by_part_number(normalized).await
    }

    async fn by_part_number_fragment(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        self.inner.by_part_number_fragment(normalized).await
    }
}

#[tokio::test]
async fn test_cancel_during_matching_stops_at_current_item() {
    let gated = Arc::new(GatedCatalog {
        inner: catalog(false),
        gate: "UNKNOWN2",
        reached: Notify::new(),
        release: Notify::new(),
    });
    let embeddings: Arc<dyn EmbeddingSearch> = Arc::new(catalog(false));
    let matcher = Arc::new(MatchEngine::new(gated.clone(), embeddings, MatchSettings::default()));
    let store = Arc::new(MemoryStore::new());
    let service = RunService::new(Arc::new(engine_with_concurrency(store.clone(), matcher, 1)));

    let bom = b"Part Number,Description,Qty\nUNKNOWN-1,Mystery,1\nUNKNOWN-2,Mystery,1\nUNKNOWN-3,Mystery,1\n";
    let started = service.start("Mystery BOM", csv(bom)).await.unwrap();

    gated.reached.notified().await;
    let snapshot = service.cancel(started.run_id).await.unwrap();
    assert!(snapshot.active);
    gated.release.notify_one();

    let state = service.wait(started.run_id).await.unwrap();
    assert_eq!(state.stage, RunStage::Failed);
    assert_eq!(state.error.as_deref(), Some(CANCELLED));

    let reviews = store.list_review_requests(started.run_id).await.unwrap();
    assert_eq!(reviews.iter().map(|r| r.line_number).collect::<Vec<_>>(), vec![1]);

    let items = store.load_items(started.run_id).await.unwrap();
    assert_eq!(items[0].status, ItemStatus::NeedsReview);
    assert!(items[1..].iter().all(|i| i.status == ItemStatus::Pending));
    assert!(store.list_po_drafts(started.run_id).await.unwrap().is_empty());

    let stored = store.load_run_state(started.run_id).await.unwrap().unwrap();
    assert_eq!(stored.stage, RunStage::Failed);
}

// ===== Store failures =====

/// Delegates to a memory store, failing selected calls on demand.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_progress: AtomicBool,
    fail_items: AtomicBool,
    panic_items: AtomicBool,
}

impl FlakyStore {
    fn check(flag: &AtomicBool) -> ProcuraResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(ProcuraError::persistence("database unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn create_bom(&self, name: &str) -> ProcuraResult<BomRecord> {
        self.inner.create_bom(name).await
    }

    async fn load_bom(&self, bom_id: BomId) -> ProcuraResult<Option<BomRecord>> {
        self.inner.load_bom(bom_id).await
    }

    async fn save_bom_totals(&self, bom_id: BomId, totals: &BomTotals) -> ProcuraResult<()> {
        self.inner.save_bom_totals(bom_id, totals).await
    }

    async fn save_run_state(&self, state: &RunState) -> ProcuraResult<()> {
        self.inner.save_run_state(state).await
    }

    async fn load_run_state(&self, run_id: Uuid) -> ProcuraResult<Option<RunState>> {
        self.inner.load_run_state(run_id).await
    }

    async fn list_run_states(&self) -> ProcuraResult<Vec<RunState>> {
        self.inner.list_run_states().await
    }

    async fn record_progress(&self, update: &ProgressUpdate) -> ProcuraResult<()> {
        Self::check(&self.fail_progress)?;
        self.inner.record_progress(update).await
    }

    async fn load_task(&self, run_id: Uuid) -> ProcuraResult<Option<TaskRecord>> {
        self.inner.load_task(run_id).await
    }

    async fn replace_items(&self, run_id: Uuid, items: &[LineItem]) -> ProcuraResult<()> {
        self.inner.replace_items(run_id, items).await
    }

    async fn load_items(&self, run_id: Uuid) -> ProcuraResult<Vec<LineItem>> {
        self.inner.load_items(run_id).await
    }

    async fn save_item(&self, run_id: Uuid, item: &LineItem) -> ProcuraResult<()> {
        if self.panic_items.load(Ordering::SeqCst) {
            panic!("item table corrupted");
        }
        Self::check(&self.fail_items)?;
        self.inner.save_item(run_id, item).await
    }

    async fn create_review_request(&self, request: &ReviewRequest) -> ProcuraResult<ReviewRequest> {
        self.inner.create_review_request(request).await
    }

    async fn load_review_request(&self, id: Uuid) -> ProcuraResult<Option<ReviewRequest>> {
        self.inner.load_review_request(id).await
    }

    async fn list_review_requests(&self, run_id: Uuid) -> ProcuraResult<Vec<ReviewRequest>> {
        self.inner.list_review_requests(run_id).await
    }

    async fn save_review_request(&self, request: &ReviewRequest) -> ProcuraResult<()> {
        self.inner.save_review_request(request).await
    }

    async fn next_po_sequence(&self) -> ProcuraResult<u64> {
        self.inner.next_po_sequence().await
    }

    async fn save_po_draft(&self, draft: &PoDraft) -> ProcuraResult<PoDraft> {
        self.inner.save_po_draft(draft).await
    }

    async fn list_po_drafts(&self, run_id: Uuid) -> ProcuraResult<Vec<PoDraft>> {
        self.inner.list_po_drafts(run_id).await
    }
}

#[tokio::test]
async fn test_progress_report_failures_are_swallowed() {
    let store = Arc::new(FlakyStore::default());
    store.fail_progress.store(true, Ordering::SeqCst);
    let engine = engine_with(store.clone(), matcher(catalog(true)));

    let state = engine.start("Rover BOM", &csv(AUTO_BOM), &CancelFlag::new()).await.unwrap();
    assert_eq!(state.stage, RunStage::Completed);
    assert!(store.load_task(state.run_id).await.unwrap().is_none());
    assert_eq!(store.list_po_drafts(state.run_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_persistence_error_fails_run_and_keeps_prior_writes() {
    let store = Arc::new(FlakyStore::default());
    store.fail_items.store(true, Ordering::SeqCst);
    let engine = engine_with(store.clone(), matcher(catalog(true)));

    let state = engine.start("Rover BOM", &csv(AUTO_BOM), &CancelFlag::new()).await.unwrap();
    assert_eq!(state.stage, RunStage::Failed);
    assert_eq!(state.progress, 25.0);
    assert!(state.error.unwrap().starts_with("Persistence error"));

    let items = store.load_items(state.run_id).await.unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.status == ItemStatus::Pending));

    let stored = store.load_run_state(state.run_id).await.unwrap().unwrap();
    assert_eq!(stored.stage, RunStage::Failed);
}

#[tokio::test]
async fn test_oversized_quantity_fails_run_instead_of_panicking() {
    let (store, engine) = setup();
    let service = RunService::new(Arc::new(engine));

    let bom = b"Part Number,Description,Qty\nABC-123,Widget,70000000000000000000000000000\n";
    let started = service.start("Huge BOM", csv(bom)).await.unwrap();
    let state = service.wait(started.run_id).await.unwrap();

    assert_eq!(state.stage, RunStage::Failed);
    assert!(state.error.unwrap().starts_with("Validation error: quantity"));
    assert!(!service.get(started.run_id).await.unwrap().active);

    let stored = store.load_run_state(started.run_id).await.unwrap().unwrap();
    assert_eq!(stored.stage, RunStage::Failed);
    assert!(store.list_po_drafts(started.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_panicking_run_task_is_marked_failed() {
    let store = Arc::new(FlakyStore::default());
    store.panic_items.store(true, Ordering::SeqCst);
    let service = RunService::new(Arc::new(engine_with(store.clone(), matcher(catalog(true)))));

    let started = service.start("Rover BOM", csv(AUTO_BOM)).await.unwrap();
    let state = service.wait(started.run_id).await.unwrap();

    assert_eq!(state.stage, RunStage::Failed);
    assert!(state.error.unwrap().contains("Run task aborted"));

    let stored = store.load_run_state(started.run_id).await.unwrap().unwrap();
    assert_eq!(stored.stage, RunStage::Failed);
    let task = store.load_task(started.run_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    let err = service.cancel(started.run_id).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Conflict { .. }));
}

// ===== Service =====

#[tokio::test]
async fn test_service_runs_in_background() {
    let (store, engine) = setup();
    let service = RunService::new(Arc::new(engine));
    let mut updates = service.subscribe();

    let started = service.start("Rover BOM", csv(AUTO_BOM)).await.unwrap();
    assert_eq!(started.stage, RunStage::Parsing);

    let finished = service.wait(started.run_id).await.unwrap();
    assert_eq!(finished.stage, RunStage::Completed);

    let snapshot = service.get(started.run_id).await.unwrap();
    assert_eq!(snapshot.progress, 100.0);
    assert!(!snapshot.active);
    assert_eq!(snapshot.task.unwrap().status, TaskStatus::Completed);

    assert_eq!(service.purchase_orders(started.run_id).await.unwrap().len(), 2);
    assert_eq!(service.list().await.unwrap().len(), 1);
    assert_eq!(store.list_run_states().await.unwrap().len(), 1);

    let first = updates.recv().await.unwrap();
    assert_eq!(first.run_id, started.run_id);

    let err = service.resume(started.run_id).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Conflict { .. }));
    let err = service.cancel(started.run_id).await.unwrap_err();
    assert!(matches!(err, ProcuraError::Conflict { .. }));
}

#[tokio::test]
async fn test_service_review_cycle() {
    let (_store, engine) = setup();
    let service = RunService::new(Arc::new(engine));

    let started = service.start("Review BOM", csv(REVIEW_BOM)).await.unwrap();
    let paused = service.wait(started.run_id).await.unwrap();
    assert_eq!(paused.stage, RunStage::AwaitingReview);

    let reviews = service.reviews(started.run_id).await.unwrap();
    assert_eq!(reviews.len(), 1);
    let decision = ReviewDecision {
        approved: true,
        ..Default::default()
    };
    service.resolve_review(reviews[0].id, &decision).await.unwrap();

    service.resume(started.run_id).await.unwrap();
    let done = service.wait(started.run_id).await.unwrap();
    assert_eq!(done.stage, RunStage::Completed);

    let drafts = service.purchase_orders(started.run_id).await.unwrap();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].lines.len(), 2);
}

#[tokio::test]
async fn test_service_unknown_run() {
    let (_store, engine) = setup();
    let service = RunService::new(Arc::new(engine));

    let err = service.get(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ProcuraError::NotFound { .. }));
    assert_eq!(err.http_status_code(), 404);
}

#[tokio::test]
async fn test_default_service_matches_from_demo_catalog() {
    let service = build_service(&AppConfig::default()).await.unwrap();

    let bom = b"Part Number,Description,Qty\nBRKT-AL-200,Bracket,2\nSCR-M3X8-SS,Screw,8\n";
    let started = service.start("Chassis BOM", csv(bom)).await.unwrap();
    let state = service.wait(started.run_id).await.unwrap();

    assert_eq!(state.stage, RunStage::Completed);
    assert_eq!(state.summary.matched_items, 2);

    let drafts = service.purchase_orders(started.run_id).await.unwrap();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].supplier_name, "Precision Fabrication Co");
    assert_eq!(drafts[0].subtotal, Decimal::new(2900, 2));
    assert_eq!(drafts[1].supplier_name, "Fastenal Industrial Supply");
    assert_eq!(drafts[1].subtotal, Decimal::new(32, 2));
}
