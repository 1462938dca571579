//! Supplier catalog models for the Procura procurement system.
//!
//! This module defines suppliers, catalog parts, supplier offers for those
//! parts, and the flattened `CatalogOffer` view the matching tiers consume.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::bom::{MatchCandidate, MatchMethod};

pub type SupplierId = i64;
pub type PartId = i64;
pub type SupplierPartId = i64;

/// A supplier (vendor) that can fulfil catalog parts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Supplier {
    pub id: SupplierId,
    #[validate(length(min = 1, max = 255, message = "Supplier name must be between 1 and 255 characters"))]
    pub name: String,
    #[validate(length(max = 50, message = "Supplier code must be at most 50 characters"))]
    pub code: Option<String>,
    pub status: SupplierStatus,
    /// Lead time used when an offer does not state its own.
    pub lead_time_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupplierStatus {
    Active,
    Inactive,
    Pending,
}

/// A part in the organisation's catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Part {
    pub id: PartId,
    #[validate(length(min = 1, max = 100, message = "Part number must be between 1 and 100 characters"))]
    pub part_number: String,
    #[validate(length(min = 1, max = 255, message = "Part name must be between 1 and 255 characters"))]
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_of_measure: String,
    /// Embedding of the description, used by the semantic tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_embedding: Option<Vec<f32>>,
}

/// A supplier's priced offer for a catalog part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplierPart {
    pub id: SupplierPartId,
    pub supplier_id: SupplierId,
    pub part_id: PartId,
    pub supplier_part_number: Option<String>,
    pub unit_price: Option<Decimal>,
    pub lead_time_days: Option<i32>,
    pub min_order_qty: i32,
    pub is_preferred: bool,
}

/// A supplier offer joined with its supplier and part, as searched by matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogOffer {
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    pub supplier_part_id: SupplierPartId,
    pub part_id: PartId,
    pub part_number: String,
    pub supplier_part_number: Option<String>,
    pub description: Option<String>,
    pub unit_price: Option<Decimal>,
    pub lead_time_days: Option<i32>,
    pub min_order_qty: i32,
    pub is_preferred: bool,
}

impl Supplier {
    pub fn new(id: SupplierId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            code: None,
            status: SupplierStatus::Active,
            lead_time_days: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SupplierStatus::Active
    }
}

impl Part {
    pub fn new(id: PartId, part_number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            part_number: part_number.into(),
            name: name.into(),
            description: None,
            category: None,
            unit_of_measure: "EA".to_string(),
            description_embedding: None,
        }
    }
}

impl CatalogOffer {
    /// Joins an offer with its supplier and part. The offer's lead time wins
    /// over the supplier default.
    pub fn join(supplier: &Supplier, part: &Part, offer: &SupplierPart) -> Self {
        Self {
            supplier_id: supplier.id,
            supplier_name: supplier.name.clone(),
            supplier_part_id: offer.id,
            part_id: part.id,
            part_number: part.part_number.clone(),
            supplier_part_number: offer.supplier_part_number.clone(),
            description: part.description.clone(),
            unit_price: offer.unit_price,
            lead_time_days: offer.lead_time_days.or(supplier.lead_time_days),
            min_order_qty: offer.min_order_qty,
            is_preferred: offer.is_preferred,
        }
    }

    /// Normalized catalog and supplier part numbers, skipping empty ones.
    pub fn normalized_numbers(&self) -> Vec<String> {
        let mut numbers = vec![normalize_part_number(&self.part_number)];
        if let Some(spn) = &self.supplier_part_number {
            numbers.push(normalize_part_number(spn));
        }
        numbers.retain(|n| !n.is_empty());
        numbers
    }

    pub fn to_candidate(&self, confidence: f64, method: MatchMethod) -> MatchCandidate {
        MatchCandidate {
            supplier_id: self.supplier_id,
            supplier_name: self.supplier_name.clone(),
            supplier_part_id: Some(self.supplier_part_id),
            part_id: Some(self.part_id),
            part_number: Some(self.part_number.clone()),
            supplier_part_number: self.supplier_part_number.clone(),
            unit_price: self.unit_price,
            lead_time_days: self.lead_time_days,
            is_preferred: self.is_preferred,
            confidence: confidence.clamp(0.0, 1.0),
            method,
        }
    }
}

/// Upper-cases and strips hyphens and whitespace, so `"abc-123"` and
/// `"ABC 123"` both normalize to `"ABC123"`.
pub fn normalize_part_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .flat_map(|c| c.to_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_part_number() {
        assert_eq!(normalize_part_number("abc-123"), "ABC123");
        assert_eq!(normalize_part_number(" ABC 12-3 "), "ABC123");
        assert_eq!(normalize_part_number("---"), "");
    }

    #[test]
    fn test_offer_lead_time_falls_back_to_supplier() {
        let mut supplier = Supplier::new(5, "Acme");
        supplier.lead_time_days = Some(14);
        let part = Part::new(1, "ABC123", "Widget");
        let offer = SupplierPart {
            id: 10,
            supplier_id: 5,
            part_id: 1,
            supplier_part_number: Some("AC-ABC-123".to_string()),
            unit_price: Some(Decimal::new(250, 2)),
            lead_time_days: None,
            min_order_qty: 1,
            is_preferred: false,
        };

        let joined = CatalogOffer::join(&supplier, &part, &offer);
        assert_eq!(joined.lead_time_days, Some(14));
        assert_eq!(joined.normalized_numbers(), vec!["ABC123".to_string(), "ACABC123".to_string()]);
    }
}
