//! Bill-of-materials models: line items, match candidates and match results.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use crate::catalog::{PartId, SupplierId, SupplierPartId};
use crate::workflow::RunStage;

pub type BomId = i64;

/// Upper bound on the alternatives kept beside the best candidate.
pub const MAX_ALTERNATIVES: usize = 4;

/// A line or order amount too large for `Decimal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cost of line {line_number} is out of range")]
pub struct CostOverflow {
    pub line_number: u32,
}

/// `total + amount`, failing instead of panicking on overflow.
pub fn add_cost(total: Decimal, amount: Decimal, line_number: u32) -> Result<Decimal, CostOverflow> {
    total.checked_add(amount).ok_or(CostOverflow { line_number })
}

/// One BOM row plus the match annotations attached to it during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    /// Unique within a run, assigned 1..n by the parser.
    pub line_number: u32,
    pub part_number_raw: Option<String>,
    pub description_raw: Option<String>,
    pub quantity: Decimal,
    pub unit_of_measure: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub match_result: MatchResult,
    pub review_reason: Option<String>,
}

/// Lifecycle of a line item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Matched,
    NeedsReview,
    Confirmed,
    Ordered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Fuzzy,
    Semantic,
    Manual,
}

/// A supplier-catalog offer proposed for a line item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchCandidate {
    pub supplier_id: SupplierId,
    pub supplier_name: String,
    pub supplier_part_id: Option<SupplierPartId>,
    pub part_id: Option<PartId>,
    pub part_number: Option<String>,
    pub supplier_part_number: Option<String>,
    pub unit_price: Option<Decimal>,
    pub lead_time_days: Option<i32>,
    pub is_preferred: bool,
    /// Always within [0, 1].
    pub confidence: f64,
    pub method: MatchMethod,
}

/// Ranked candidates for one line item. `alternatives` never holds `best`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub best: Option<MatchCandidate>,
    pub alternatives: Vec<MatchCandidate>,
}

/// BOM header record mirrored by the progress reporter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BomRecord {
    pub id: BomId,
    pub name: String,
    pub processing_status: RunStage,
    pub processing_progress: f64,
    pub processing_step: Option<String>,
    pub processing_error: Option<String>,
    pub total_items: usize,
    pub matched_items: usize,
    pub total_cost: Decimal,
}

/// Aggregates written to the BOM record once matching finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BomTotals {
    pub total_items: usize,
    pub matched_items: usize,
    pub total_cost: Decimal,
}

impl ItemStatus {
    /// Self transitions are allowed so stage writes can be re-applied.
    pub fn can_transition_to(&self, target: ItemStatus) -> bool {
        use ItemStatus::*;

        if *self == target {
            return true;
        }

        match (self, target) {
            (Pending, Matched) => true,
            (Pending, NeedsReview) => true,

            (Matched, Confirmed) => true,
            (NeedsReview, Confirmed) => true,

            (Confirmed, Ordered) => true,

            _ => false,
        }
    }

    /// Items in these states can be placed on a purchase order.
    pub fn is_orderable(&self) -> bool {
        matches!(self, ItemStatus::Matched | ItemStatus::Confirmed)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Matched => write!(f, "matched"),
            Self::NeedsReview => write!(f, "needs_review"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Ordered => write!(f, "ordered"),
        }
    }
}

impl std::fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Fuzzy => write!(f, "fuzzy"),
            Self::Semantic => write!(f, "semantic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl LineItem {
    pub fn new(line_number: u32, quantity: Decimal) -> Self {
        Self {
            line_number,
            part_number_raw: None,
            description_raw: None,
            quantity,
            unit_of_measure: "EA".to_string(),
            status: ItemStatus::Pending,
            match_result: MatchResult::none(),
            review_reason: None,
        }
    }

    pub fn with_part_number(mut self, part_number: impl Into<String>) -> Self {
        self.part_number_raw = Some(part_number.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description_raw = Some(description.into());
        self
    }

    /// Label used in review titles and log lines.
    pub fn label(&self) -> &str {
        self.part_number_raw
            .as_deref()
            .or(self.description_raw.as_deref())
            .unwrap_or("Unknown")
    }

    pub fn matched_supplier_id(&self) -> Option<SupplierId> {
        self.match_result.best.as_ref().map(|b| b.supplier_id)
    }

    pub fn unit_cost(&self) -> Option<Decimal> {
        self.match_result.best.as_ref().and_then(|b| b.unit_price)
    }

    /// `unit_cost × quantity`, `None` when the match carries no price.
    pub fn extended_cost(&self) -> Result<Option<Decimal>, CostOverflow> {
        self.unit_cost()
            .map(|price| {
                price
                    .checked_mul(self.quantity)
                    .ok_or(CostOverflow { line_number: self.line_number })
            })
            .transpose()
    }

    /// Moves the item to `status`, rejecting transitions the lifecycle forbids.
    pub fn transition(&mut self, status: ItemStatus) -> Result<(), String> {
        if !self.status.can_transition_to(status) {
            return Err(format!(
                "Invalid item transition from {} to {} on line {}",
                self.status, status, self.line_number
            ));
        }
        self.status = status;
        Ok(())
    }
}

impl MatchCandidate {
    /// Total order used to rank candidates: confidence descending, preferred
    /// first, then price ascending with missing prices last. Supplier and
    /// offer ids break the remaining ties.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .confidence
            .total_cmp(&self.confidence)
            .then_with(|| other.is_preferred.cmp(&self.is_preferred))
            .then_with(|| match (self.unit_price, other.unit_price) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.supplier_id.cmp(&other.supplier_id))
            .then_with(|| self.supplier_part_id.cmp(&other.supplier_part_id))
    }

    /// Two candidates naming the same supplier offer.
    pub fn same_offer(&self, other: &Self) -> bool {
        self.supplier_id == other.supplier_id && self.supplier_part_id == other.supplier_part_id
    }
}

impl MatchResult {
    /// The documented "no match" outcome.
    pub fn none() -> Self {
        Self::default()
    }

    /// Ranks `candidates`, drops repeated offers, and splits the list into
    /// the best candidate and at most `max_alternatives` (capped at
    /// `MAX_ALTERNATIVES`) runners-up.
    pub fn from_ranked(mut candidates: Vec<MatchCandidate>, max_alternatives: usize) -> Self {
        candidates.sort_by(|a, b| a.rank_cmp(b));

        let mut unique: Vec<MatchCandidate> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !unique.iter().any(|c| c.same_offer(&candidate)) {
                unique.push(candidate);
            }
        }

        let mut ranked = unique.into_iter();
        let best = ranked.next();
        let alternatives = ranked.take(max_alternatives.min(MAX_ALTERNATIVES)).collect();

        Self { best, alternatives }
    }

    pub fn is_match(&self) -> bool {
        self.best.is_some()
    }

    pub fn confidence(&self) -> f64 {
        self.best.as_ref().map(|b| b.confidence).unwrap_or(0.0)
    }

    /// Replaces `best` with an operator-chosen candidate, marked `manual`.
    /// The previous best moves to the front of the alternatives.
    pub fn select(&self, chosen: &MatchCandidate) -> Self {
        let mut best = chosen.clone();
        best.method = MatchMethod::Manual;

        let mut alternatives: Vec<MatchCandidate> = Vec::with_capacity(MAX_ALTERNATIVES);
        if let Some(previous) = &self.best {
            if !previous.same_offer(&best) {
                alternatives.push(previous.clone());
            }
        }
        alternatives.extend(self.alternatives.iter().filter(|c| !c.same_offer(&best)).cloned());
        alternatives.truncate(MAX_ALTERNATIVES);

        Self { best: Some(best), alternatives }
    }

    /// Confirms the current best as an operator decision.
    pub fn confirm_manually(&self) -> Self {
        let mut confirmed = self.clone();
        if let Some(best) = confirmed.best.as_mut() {
            best.method = MatchMethod::Manual;
        }
        confirmed
    }
}

/// Formats a [0, 1] score as a whole percentage, e.g. `0.62` as `"62%"`.
pub fn format_percent(score: f64) -> String {
    format!("{:.0}%", score * 100.0)
}
