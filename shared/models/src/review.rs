//! Human review requests raised for low-confidence or missing matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bom::{format_percent, BomId, LineItem, MatchCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Escalation of one line item to an operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewRequest {
    pub id: Uuid,
    pub run_id: Uuid,
    pub bom_id: BomId,
    pub line_number: u32,
    pub title: String,
    pub description: String,
    pub reason: String,
    pub confidence: f64,
    /// Options offered to the operator, in rank order.
    pub alternatives: Vec<MatchCandidate>,
    pub status: ReviewStatus,
    pub selected_option: Option<usize>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Operator decision on a review request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewDecision {
    pub approved: bool,
    /// Index into the request's `alternatives`.
    pub selected_option: Option<usize>,
    pub notes: Option<String>,
}

impl ReviewRequest {
    pub fn new(
        run_id: Uuid,
        bom_id: BomId,
        item: &LineItem,
        reason: impl Into<String>,
        confidence: f64,
        alternatives: Vec<MatchCandidate>,
    ) -> Self {
        let description = format!(
            "Confidence: {}. {} alternatives available.",
            format_percent(confidence),
            alternatives.len()
        );

        Self {
            id: Uuid::new_v4(),
            run_id,
            bom_id,
            line_number: item.line_number,
            title: format!("Review match: {}", item.label()),
            description,
            reason: reason.into(),
            confidence,
            alternatives,
            status: ReviewStatus::Pending,
            selected_option: None,
            review_notes: None,
            created_at: Utc::now(),
            reviewed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }

    /// The alternative named by `option`, if in range.
    pub fn option(&self, option: usize) -> Option<&MatchCandidate> {
        self.alternatives.get(option)
    }

    /// Records the decision. Returns `false` when the request was already
    /// resolved, leaving it untouched.
    pub fn resolve(&mut self, decision: &ReviewDecision) -> bool {
        if !self.is_pending() {
            return false;
        }

        self.status = if decision.approved {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Rejected
        };
        self.selected_option = decision.selected_option;
        self.review_notes = decision.notes.clone();
        self.reviewed_at = Some(Utc::now());
        true
    }
}
