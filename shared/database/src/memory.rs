//! In-memory implementations of the store and catalog capabilities.
//!
//! Used by the default `memory` backend and by the test suites.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use procura_models::{
    normalize_part_number, BomId, BomRecord, BomTotals, CatalogOffer, LineItem, Part, PartId, PoDraft,
    ProgressUpdate, ReviewRequest, RunStage, RunState, Supplier, SupplierId, SupplierPart, TaskRecord,
};
use procura_utils::{ProcuraError, ProcuraResult};

use crate::catalog::{cosine_similarity, CatalogSearch, Embedder, EmbeddingSearch};
use crate::store::Store;

#[derive(Default)]
pub struct MemoryStore {
    boms: Arc<RwLock<HashMap<BomId, BomRecord>>>,
    runs: Arc<RwLock<HashMap<Uuid, RunState>>>,
    tasks: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
    progress_history: Arc<RwLock<HashMap<Uuid, Vec<ProgressUpdate>>>>,
    items: Arc<RwLock<HashMap<Uuid, BTreeMap<u32, LineItem>>>>,
    reviews: Arc<RwLock<HashMap<Uuid, ReviewRequest>>>,
    drafts: Arc<RwLock<HashMap<(Uuid, SupplierId), PoDraft>>>,
    next_bom_id: AtomicI64,
    po_sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every progress write recorded for the run, oldest first.
    pub async fn progress_history(&self, run_id: Uuid) -> Vec<ProgressUpdate> {
        self.progress_history
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_bom(&self, name: &str) -> ProcuraResult<BomRecord> {
        let id = self.next_bom_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = BomRecord {
            id,
            name: name.to_string(),
            processing_status: RunStage::Parsing,
            processing_progress: 0.0,
            processing_step: None,
            processing_error: None,
            total_items: 0,
            matched_items: 0,
            total_cost: Decimal::ZERO,
        };
        self.boms.write().await.insert(id, record.clone());
        Ok(record)
    }

    async fn load_bom(&self, bom_id: BomId) -> ProcuraResult<Option<BomRecord>> {
        Ok(self.boms.read().await.get(&bom_id).cloned())
    }

    async fn save_bom_totals(&self, bom_id: BomId, totals: &BomTotals) -> ProcuraResult<()> {
        let mut boms = self.boms.write().await;
        let bom = boms
            .get_mut(&bom_id)
            .ok_or_else(|| ProcuraError::not_found(format!("BOM {}", bom_id)))?;
        bom.total_items = totals.total_items;
        bom.matched_items = totals.matched_items;
        bom.total_cost = totals.total_cost;
        Ok(())
    }

    async fn save_run_state(&self, state: &RunState) -> ProcuraResult<()> {
        self.runs.write().await.insert(state.run_id, state.clone());
        Ok(())
    }

    async fn load_run_state(&self, run_id: Uuid) -> ProcuraResult<Option<RunState>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_run_states(&self) -> ProcuraResult<Vec<RunState>> {
        let mut runs: Vec<RunState> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    async fn record_progress(&self, update: &ProgressUpdate) -> ProcuraResult<()> {
        {
            let mut tasks = self.tasks.write().await;
            let task = tasks.entry(update.run_id).or_insert_with(|| TaskRecord {
                run_id: update.run_id,
                status: update.task_status,
                progress: 0.0,
                current_step: String::new(),
                current_agent: update.agent,
                error_message: None,
                output: None,
                started_at: Some(update.at),
                completed_at: None,
            });
            task.status = update.task_status;
            task.progress = update.progress;
            task.current_step = update.step.clone();
            task.current_agent = update.agent;
            task.error_message = update.error.clone();
            if update.stage.is_terminal() {
                task.output = update.summary.clone();
                task.completed_at = Some(update.at);
            }
        }

        if let Some(bom) = self.boms.write().await.get_mut(&update.bom_id) {
            bom.processing_status = update.stage;
            bom.processing_progress = update.progress;
            bom.processing_step = Some(update.step.clone());
            bom.processing_error = update.error.clone();
        }

        self.progress_history
            .write()
            .await
            .entry(update.run_id)
            .or_default()
            .push(update.clone());
        Ok(())
    }

    async fn load_task(&self, run_id: Uuid) -> ProcuraResult<Option<TaskRecord>> {
        Ok(self.tasks.read().await.get(&run_id).cloned())
    }

    async fn replace_items(&self, run_id: Uuid, items: &[LineItem]) -> ProcuraResult<()> {
        let by_line = items.iter().map(|i| (i.line_number, i.clone())).collect();
        self.items.write().await.insert(run_id, by_line);
        Ok(())
    }

    async fn load_items(&self, run_id: Uuid) -> ProcuraResult<Vec<LineItem>> {
        Ok(self
            .items
            .read()
            .await
            .get(&run_id)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_item(&self, run_id: Uuid, item: &LineItem) -> ProcuraResult<()> {
        self.items
            .write()
            .await
            .entry(run_id)
            .or_default()
            .insert(item.line_number, item.clone());
        Ok(())
    }

    async fn create_review_request(&self, request: &ReviewRequest) -> ProcuraResult<ReviewRequest> {
        let mut reviews = self.reviews.write().await;
        if let Some(existing) = reviews
            .values()
            .find(|r| r.run_id == request.run_id && r.line_number == request.line_number)
        {
            return Ok(existing.clone());
        }
        reviews.insert(request.id, request.clone());
        Ok(request.clone())
    }

    async fn load_review_request(&self, id: Uuid) -> ProcuraResult<Option<ReviewRequest>> {
        Ok(self.reviews.read().await.get(&id).cloned())
    }

    async fn list_review_requests(&self, run_id: Uuid) -> ProcuraResult<Vec<ReviewRequest>> {
        let mut requests: Vec<ReviewRequest> = self
            .reviews
            .read()
            .await
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.line_number);
        Ok(requests)
    }

    async fn save_review_request(&self, request: &ReviewRequest) -> ProcuraResult<()> {
        let mut reviews = self.reviews.write().await;
        if !reviews.contains_key(&request.id) {
            return Err(ProcuraError::not_found(format!("Review request {}", request.id)));
        }
        reviews.insert(request.id, request.clone());
        Ok(())
    }

    async fn next_po_sequence(&self) -> ProcuraResult<u64> {
        Ok(self.po_sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn save_po_draft(&self, draft: &PoDraft) -> ProcuraResult<PoDraft> {
        let mut drafts = self.drafts.write().await;
        let key = (draft.run_id, draft.supplier_id);
        let mut stored = draft.clone();
        if let Some(existing) = drafts.get(&key) {
            stored.id = existing.id;
            stored.po_number = existing.po_number.clone();
            stored.created_at = existing.created_at;
        }
        drafts.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_po_drafts(&self, run_id: Uuid) -> ProcuraResult<Vec<PoDraft>> {
        let mut drafts: Vec<PoDraft> = self
            .drafts
            .read()
            .await
            .values()
            .filter(|d| d.run_id == run_id)
            .cloned()
            .collect();
        drafts.sort_by_key(|d| d.supplier_id);
        Ok(drafts)
    }
}

/// Catalog held in memory, searched by scanning.
#[derive(Default)]
pub struct MemoryCatalog {
    suppliers: HashMap<SupplierId, Supplier>,
    parts: HashMap<PartId, Part>,
    offers: Vec<SupplierPart>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for MemoryCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCatalog")
            .field("suppliers", &self.suppliers)
            .field("parts", &self.parts)
            .field("offers", &self.offers)
            .field("embedder", &self.embedder.is_some())
            .finish()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn add_supplier(&mut self, supplier: Supplier) -> &mut Self {
        self.suppliers.insert(supplier.id, supplier);
        self
    }

    pub fn add_part(&mut self, part: Part) -> &mut Self {
        self.parts.insert(part.id, part);
        self
    }

    pub fn add_offer(&mut self, offer: SupplierPart) -> &mut Self {
        self.offers.push(offer);
        self
    }

    /// Offers from active suppliers joined with their supplier and part.
    pub fn active_offers(&self) -> Vec<CatalogOffer> {
        let mut offers: Vec<CatalogOffer> = self
            .offers
            .iter()
            .filter_map(|offer| {
                let supplier = self.suppliers.get(&offer.supplier_id).filter(|s| s.is_active())?;
                let part = self.parts.get(&offer.part_id)?;
                Some(CatalogOffer::join(supplier, part, offer))
            })
            .collect();
        offers.sort_by_key(|o| (o.supplier_id, o.supplier_part_id));
        offers
    }

    fn search(&self, matches: impl Fn(&str) -> bool) -> Vec<CatalogOffer> {
        self.active_offers()
            .into_iter()
            .filter(|offer| offer.normalized_numbers().iter().any(|n| matches(n)))
            .collect()
    }
}

#[async_trait]
impl CatalogSearch for MemoryCatalog {
    async fn by_part_number(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        let normalized = normalize_part_number(normalized);
        Ok(self.search(|n| n == normalized))
    }

    async fn by_part_number_fragment(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        let normalized = normalize_part_number(normalized);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.search(|n| n.contains(normalized.as_str()) || normalized.contains(n)))
    }
}

#[async_trait]
impl EmbeddingSearch for MemoryCatalog {
    async fn by_similarity(&self, text: &str, top_k: usize) -> ProcuraResult<Vec<(CatalogOffer, f64)>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| ProcuraError::external_service("embedding", "No embedding provider configured"))?;
        let query = embedder.embed(text).await?;

        let mut scored: Vec<(PartId, f64)> = self
            .parts
            .values()
            .filter_map(|part| {
                let embedding = part.description_embedding.as_ref()?;
                Some((part.id, cosine_similarity(&query, embedding)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        let offers = self.active_offers();
        Ok(scored
            .into_iter()
            .flat_map(|(part_id, similarity)| {
                offers
                    .iter()
                    .filter(move |o| o.part_id == part_id)
                    .map(move |o| (o.clone(), similarity))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_models::{ItemStatus, SupplierStatus};

    fn offer(id: i64, supplier_id: i64, part_id: i64, spn: Option<&str>) -> SupplierPart {
        SupplierPart {
            id,
            supplier_id,
            part_id,
            supplier_part_number: spn.map(str::to_string),
            unit_price: Some(Decimal::new(150, 2)),
            lead_time_days: None,
            min_order_qty: 1,
            is_preferred: false,
        }
    }

    fn catalog() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        let mut inactive = Supplier::new(9, "Dormant Parts");
        inactive.status = SupplierStatus::Inactive;
        catalog
            .add_supplier(Supplier::new(5, "Acme"))
            .add_supplier(inactive)
            .add_part(Part::new(1, "ABC123", "Widget"))
            .add_part(Part::new(2, "ABC1234-X", "Widget XL"))
            .add_offer(offer(10, 5, 1, Some("AC-77")))
            .add_offer(offer(11, 9, 1, None))
            .add_offer(offer(12, 5, 2, None));
        catalog
    }

    #[tokio::test]
    async fn test_exact_search_skips_inactive_suppliers() {
        let catalog = catalog();
        let hits = catalog.by_part_number("ABC123").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].supplier_part_id, 10);

        let by_supplier_number = catalog.by_part_number("AC77").await.unwrap();
        assert_eq!(by_supplier_number.len(), 1);
    }

    #[tokio::test]
    async fn test_fragment_search_both_directions() {
        let catalog = catalog();
        let contains = catalog.by_part_number_fragment("ABC1234").await.unwrap();
        let ids: Vec<i64> = contains.iter().map(|o| o.supplier_part_id).collect();
        assert_eq!(ids, vec![10, 12]);
    }

    #[tokio::test]
    async fn test_similarity_without_embedder_fails() {
        let err = catalog().by_similarity("capacitor", 5).await.unwrap_err();
        assert!(matches!(err, ProcuraError::ExternalService { .. }));
    }

    #[tokio::test]
    async fn test_review_request_upsert_keeps_first() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let item = LineItem::new(1, Decimal::ONE).with_part_number("ABC-123");
        let first = ReviewRequest::new(run_id, 1, &item, "No supplier match found", 0.0, Vec::new());
        let second = ReviewRequest::new(run_id, 1, &item, "No supplier match found", 0.0, Vec::new());

        let stored = store.create_review_request(&first).await.unwrap();
        let again = store.create_review_request(&second).await.unwrap();
        assert_eq!(stored.id, first.id);
        assert_eq!(again.id, first.id);
        assert_eq!(store.list_review_requests(run_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_items_round_trip_in_line_order() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        let items = vec![
            LineItem::new(2, Decimal::ONE).with_part_number("B"),
            LineItem::new(1, Decimal::ONE).with_part_number("A"),
        ];
        store.replace_items(run_id, &items).await.unwrap();

        let mut updated = items[0].clone();
        updated.status = ItemStatus::Matched;
        store.save_item(run_id, &updated).await.unwrap();

        let loaded = store.load_items(run_id).await.unwrap();
        assert_eq!(loaded.iter().map(|i| i.line_number).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(loaded[1].status, ItemStatus::Matched);
    }
}
