//! Catalog Repository
//!
//! Supplier catalog lookups over `suppliers`, `parts` and `supplier_parts`.
//! Part numbers are normalized in SQL the same way the matcher normalizes
//! BOM input: upper-cased with hyphens and whitespace removed.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;

use procura_models::CatalogOffer;
use procura_utils::{ProcuraError, ProcuraResult};

use super::PersistenceContext;
use crate::catalog::{cosine_similarity, CatalogSearch, Embedder, EmbeddingSearch};

const OFFER_SELECT: &str = r#"
    SELECT s.id AS supplier_id, s.name AS supplier_name, sp.id AS supplier_part_id, p.id AS part_id,
           p.part_number, sp.supplier_part_number, p.description, sp.unit_price,
           COALESCE(sp.lead_time_days, s.lead_time_days) AS lead_time_days,
           sp.min_order_qty, sp.is_preferred,
           UPPER(regexp_replace(p.part_number, '[-\s]', '', 'g')) AS norm_part,
           UPPER(regexp_replace(COALESCE(sp.supplier_part_number, ''), '[-\s]', '', 'g')) AS norm_supplier_part
    FROM supplier_parts sp
    JOIN suppliers s ON s.id = sp.supplier_id
    JOIN parts p ON p.id = sp.part_id
    WHERE s.status = 'active'
"#;

pub struct PgCatalog {
    pool: PgPool,
    embedder: Option<Arc<dyn Embedder>>,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, embedder: None }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    async fn fetch_offers(&self, filter: &str, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        let sql = format!(
            "SELECT * FROM ({}) offers WHERE {} ORDER BY supplier_id, supplier_part_id",
            OFFER_SELECT, filter
        );

        let rows: Vec<OfferRow> = sqlx::query_as(&sql)
            .bind(normalized)
            .fetch_all(&self.pool)
            .await
            .persistence_context("Failed to search catalog")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl CatalogSearch for PgCatalog {
    async fn by_part_number(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_offers("norm_part = $1 OR norm_supplier_part = $1", normalized)
            .await
    }

    async fn by_part_number_fragment(&self, normalized: &str) -> ProcuraResult<Vec<CatalogOffer>> {
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch_offers(
            r#"(norm_part <> '' AND (strpos(norm_part, $1) > 0 OR strpos($1, norm_part) > 0))
               OR (norm_supplier_part <> ''
                   AND (strpos(norm_supplier_part, $1) > 0 OR strpos($1, norm_supplier_part) > 0))"#,
            normalized,
        )
        .await
    }
}

#[async_trait]
impl EmbeddingSearch for PgCatalog {
    async fn by_similarity(&self, text: &str, top_k: usize) -> ProcuraResult<Vec<(CatalogOffer, f64)>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| ProcuraError::external_service("embedding", "No embedding provider configured"))?;
        let query = embedder.embed(text).await?;

        let rows: Vec<(i64, serde_json::Value)> = sqlx::query_as(
            "SELECT id, description_embedding FROM parts WHERE description_embedding IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .persistence_context("Failed to load part embeddings")?;

        let mut scored: Vec<(i64, f64)> = Vec::with_capacity(rows.len());
        for (part_id, embedding) in rows {
            match serde_json::from_value::<Vec<f32>>(embedding) {
                Ok(vector) => scored.push((part_id, cosine_similarity(&query, &vector))),
                Err(e) => tracing::warn!(part_id, error = %e, "Skipping malformed part embedding"),
            }
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let part_ids: Vec<i64> = scored.iter().map(|(id, _)| *id).collect();
        let sql = format!(
            "SELECT * FROM ({}) offers WHERE part_id = ANY($1) ORDER BY supplier_id, supplier_part_id",
            OFFER_SELECT
        );
        let rows: Vec<OfferRow> = sqlx::query_as(&sql)
            .bind(&part_ids)
            .fetch_all(&self.pool)
            .await
            .persistence_context("Failed to fetch offers for similar parts")?;
        let offers: Vec<CatalogOffer> = rows.into_iter().map(Into::into).collect();

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

#[derive(Debug, FromRow)]
struct OfferRow {
    supplier_id: i64,
    supplier_name: String,
    supplier_part_id: i64,
    part_id: i64,
    part_number: String,
    supplier_part_number: Option<String>,
    description: Option<String>,
    unit_price: Option<Decimal>,
    lead_time_days: Option<i32>,
    min_order_qty: i32,
    is_preferred: bool,
}

impl From<OfferRow> for CatalogOffer {
    fn from(row: OfferRow) -> Self {
        Self {
            supplier_id: row.supplier_id,
            supplier_name: row.supplier_name,
            supplier_part_id: row.supplier_part_id,
            part_id: row.part_id,
            part_number: row.part_number,
            supplier_part_number: row.supplier_part_number,
            description: row.description,
            unit_price: row.unit_price,
            lead_time_days: row.lead_time_days,
            min_order_qty: row.min_order_qty,
            is_preferred: row.is_preferred,
        }
    }
}
