//! Purchase-order groups and the drafts emitted from them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bom::{BomId, CostOverflow, LineItem};
use crate::catalog::{PartId, SupplierId, SupplierPartId};

/// Orderable line items resolved to one supplier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoGroup {
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    /// In input order.
    pub items: Vec<LineItem>,
    /// Exact Σ(unit price × quantity); unpriced items add zero.
    pub subtotal: Decimal,
    /// Line numbers of items with no resolved price.
    pub price_warnings: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoStatus {
    Draft,
    PendingApproval,
    Approved,
    Sent,
    Cancelled,
}

impl std::fmt::Display for PoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::PendingApproval => write!(f, "pending_approval"),
            Self::Approved => write!(f, "approved"),
            Self::Sent => write!(f, "sent"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoLine {
    /// 1..n within the draft.
    pub line_number: u32,
    pub bom_line_number: u32,
    pub part_id: Option<PartId>,
    pub supplier_part_id: Option<SupplierPartId>,
    pub part_number: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_of_measure: String,
    pub unit_price: Decimal,
    pub extended_price: Decimal,
}

/// Draft purchase order generated from a BOM run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoDraft {
    pub id: Uuid,
    pub po_number: String,
    pub run_id: Uuid,
    pub bom_id: BomId,
    pub source_bom_name: String,
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    pub status: PoStatus,
    pub auto_generated: bool,
    pub lines: Vec<PoLine>,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub requires_approval: bool,
    pub price_warnings: Vec<u32>,
    pub created_at: DateTime<Utc>,
}

impl PoDraft {
    /// Builds the draft for `group`. Totals equal the subtotal; tax and
    /// shipping are added downstream.
    pub fn from_group(
        group: &PoGroup,
        po_number: String,
        run_id: Uuid,
        bom_id: BomId,
        source_bom_name: &str,
        approval_threshold: Decimal,
    ) -> Result<Self, CostOverflow> {
        let lines = group
            .items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let best = item.match_result.best.as_ref();
                let unit_price = item.unit_cost().unwrap_or(Decimal::ZERO);
                let extended_price = item.extended_cost()?.unwrap_or(Decimal::ZERO);
                Ok(PoLine {
                    line_number: idx as u32 + 1,
                    bom_line_number: item.line_number,
                    part_id: best.and_then(|b| b.part_id),
                    supplier_part_id: best.and_then(|b| b.supplier_part_id),
                    part_number: item.part_number_raw.clone(),
                    description: item.description_raw.clone(),
                    quantity: item.quantity,
                    unit_of_measure: item.unit_of_measure.clone(),
                    unit_price,
                    extended_price,
                })
            })
            .collect::<Result<Vec<_>, CostOverflow>>()?;

        Ok(Self {
            id: Uuid::new_v4(),
            po_number,
            run_id,
            bom_id,
            source_bom_name: source_bom_name.to_string(),
            supplier_id: group.supplier_id,
            supplier_name: group.supplier_name.clone(),
            status: PoStatus::Draft,
            auto_generated: true,
            lines,
            subtotal: group.subtotal,
            total: group.subtotal,
            requires_approval: group.subtotal >= approval_threshold,
            price_warnings: group.price_warnings.clone(),
            created_at: Utc::now(),
        })
    }
}

/// `"{prefix}-{YYYYMM}-{seq:04}"`, e.g. `PO-202610-0007`.
pub fn po_number(prefix: &str, at: DateTime<Utc>, sequence: u64) -> String {
    format!("{}-{}-{:04}", prefix, at.format("%Y%m"), sequence)
}
