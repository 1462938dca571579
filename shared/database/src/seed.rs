//! Catalog seed files for the in-memory backend.
//!
//! A seed lists suppliers by code and parts with the offers each supplier
//! makes for them. Ids are assigned in file order.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use procura_models::{Part, Supplier, SupplierId, SupplierPart};
use procura_utils::{ProcuraError, ProcuraResult};

use crate::memory::MemoryCatalog;

const DEMO_CATALOG: &str = include_str!("../seed/demo_catalog.json");

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSeed {
    pub suppliers: Vec<SeedSupplier>,
    pub parts: Vec<SeedPart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedSupplier {
    pub code: String,
    pub name: String,
    pub lead_time_days: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedPart {
    pub part_number: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_unit_of_measure")]
    pub unit_of_measure: String,
    #[serde(default)]
    pub suppliers: Vec<SeedOffer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedOffer {
    pub supplier_code: String,
    pub supplier_pn: Option<String>,
    pub price: Decimal,
    pub lead_time: Option<i32>,
    #[serde(default = "default_moq")]
    pub moq: i32,
    #[serde(default)]
    pub preferred: bool,
}

fn default_unit_of_measure() -> String {
    "EA".to_string()
}

fn default_moq() -> i32 {
    1
}

impl CatalogSeed {
    /// The demo catalog shipped with the service.
    pub fn demo() -> ProcuraResult<Self> {
        Self::from_json(DEMO_CATALOG)
    }

    pub fn from_json(json: &str) -> ProcuraResult<Self> {
        serde_json::from_str(json).map_err(|e| ProcuraError::configuration(format!("Invalid catalog seed: {}", e)))
    }

    pub fn from_path(path: impl AsRef<Path>) -> ProcuraResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            ProcuraError::configuration(format!("Cannot read catalog seed {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

impl MemoryCatalog {
    /// Builds a catalog from `seed`. Offers naming an unknown supplier code
    /// are skipped with a warning.
    pub fn from_seed(seed: &CatalogSeed) -> Self {
        let mut catalog = MemoryCatalog::new();
        let mut supplier_ids: HashMap<&str, SupplierId> = HashMap::new();

        for (idx, entry) in seed.suppliers.iter().enumerate() {
            let id = idx as SupplierId + 1;
            let mut supplier = Supplier::new(id, entry.name.clone());
            supplier.code = Some(entry.code.clone());
            supplier.lead_time_days = entry.lead_time_days;
            supplier_ids.insert(entry.code.as_str(), id);
            catalog.add_supplier(supplier);
        }

        let mut offer_id = 0;
        for (idx, entry) in seed.parts.iter().enumerate() {
            let part_id = idx as i64 + 1;
            let mut part = Part::new(part_id, entry.part_number.clone(), entry.name.clone());
            part.description = entry.description.clone();
            part.category = entry.category.clone();
            part.unit_of_measure = entry.unit_of_measure.clone();
            catalog.add_part(part);

            for offer in &entry.suppliers {
                let Some(&supplier_id) = supplier_ids.get(offer.supplier_code.as_str()) else {
                    warn!(
                        part_number = %entry.part_number,
                        supplier_code = %offer.supplier_code,
                        "Seed offer names an unknown supplier"
                    );
                    continue;
                };

                offer_id += 1;
                catalog.add_offer(SupplierPart {
                    id: offer_id,
                    supplier_id,
                    part_id,
                    supplier_part_number: offer.supplier_pn.clone(),
                    unit_price: Some(offer.price),
                    lead_time_days: offer.lead_time,
                    min_order_qty: offer.moq,
                    is_preferred: offer.preferred,
                });
            }
        }

        info!(
            suppliers = seed.suppliers.len(),
            parts = seed.parts.len(),
            offers = offer_id,
            "Catalog seeded"
        );
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogSearch;

    #[test]
    fn test_demo_catalog_parses() {
        let seed = CatalogSeed::demo().unwrap();
        assert!(seed.suppliers.len() >= 3);
        assert!(seed.parts.iter().all(|p| !p.suppliers.is_empty()));
    }

    #[tokio::test]
    async fn test_seeded_catalog_is_searchable() {
        let catalog = MemoryCatalog::from_seed(&CatalogSeed::demo().unwrap());

        let offers = catalog.by_part_number("RES10K0603").await.unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].supplier_name, "Acme Components");
        assert_eq!(offers[0].unit_price, Some(Decimal::new(12, 3)));
        assert_eq!(offers[0].lead_time_days, Some(7));
        assert!(offers[0].is_preferred);
        assert_eq!(offers[1].lead_time_days, Some(14));

        let by_supplier_number = catalog.by_part_number("NWSTM32F103C8").await.unwrap();
        assert_eq!(by_supplier_number.len(), 1);
        assert_eq!(by_supplier_number[0].part_number, "MCU-STM32F103");
    }

    #[test]
    fn test_unknown_supplier_offers_are_skipped() {
        let seed = CatalogSeed::from_json(
            r#"{
                "suppliers": [{ "code": "ACME", "name": "Acme" }],
                "parts": [{
                    "part_number": "X-1",
                    "name": "Widget",
                    "suppliers": [
                        { "supplier_code": "ACME", "price": "1.50" },
                        { "supplier_code": "GONE", "price": "1.00" }
                    ]
                }]
            }"#,
        )
        .unwrap();

        let catalog = MemoryCatalog::from_seed(&seed);
        let offers = catalog.active_offers();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].min_order_qty, 1);
        assert_eq!(offers[0].supplier_part_id, 1);
    }

    #[test]
    fn test_malformed_seed_is_a_configuration_error() {
        let err = CatalogSeed::from_json("{\"suppliers\": []}").unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(CatalogSeed::from_path("/nonexistent/catalog.json").is_err());
    }
}
