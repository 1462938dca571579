//! Review Gate
//!
//! Decides per item whether a match may proceed automatically or must be
//! escalated to an operator.

use procura_models::{format_percent, ItemStatus, LineItem, MatchResult, ReviewRequest, RunState};

pub const NO_MATCH_REASON: &str = "No supplier match found";

/// Outcome of gating one item.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub status: ItemStatus,
    pub reason: Option<String>,
    pub review: Option<ReviewRequest>,
}

impl GateDecision {
    pub fn needs_review(&self) -> bool {
        self.review.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReviewGate {
    threshold: f64,
}

impl ReviewGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// A confidence equal to the threshold passes.
    pub fn decide(&self, state: &RunState, item: &LineItem, result: &MatchResult) -> GateDecision {
        let Some(best) = result.best.as_ref() else {
            return self.escalate(state, item, NO_MATCH_REASON.to_string(), 0.0, result);
        };

        if best.confidence < self.threshold {
            let reason = format!("Low confidence match ({})", format_percent(best.confidence));
            return self.escalate(state, item, reason, best.confidence, result);
        }

        GateDecision {
            status: ItemStatus::Matched,
            reason: None,
            review: None,
        }
    }

    /// The run pauses when any item was escalated.
    pub fn run_needs_review(decisions: &[GateDecision]) -> bool {
        decisions.iter().any(GateDecision::needs_review)
    }

    fn escalate(&self, state: &RunState, item: &LineItem, reason: String, confidence: f64, result: &MatchResult) -> GateDecision {
        let review = ReviewRequest::new(
            state.run_id,
            state.bom_id,
            item,
            reason.clone(),
            confidence,
            result.alternatives.clone(),
        );

        GateDecision {
            status: ItemStatus::NeedsReview,
            reason: Some(reason),
            review: Some(review),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_models::{MatchCandidate, MatchMethod};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn candidate(supplier_id: i64, confidence: f64) -> MatchCandidate {
        MatchCandidate {
            supplier_id,
            supplier_name: "Acme".to_string(),
            supplier_part_id: Some(supplier_id),
            part_id: Some(1),
            part_number: None,
            supplier_part_number: None,
            unit_price: None,
            lead_time_days: None,
            is_preferred: false,
            confidence,
            method: MatchMethod::Semantic,
        }
    }

    fn state() -> RunState {
        RunState::new(Uuid::new_v4(), 7, "Gate BOM")
    }

    #[test]
    fn test_no_match_escalates_without_alternatives() {
        let item = LineItem::new(1, Decimal::ONE).with_part_number("XYZ-1");
        let decision = ReviewGate::new(0.8).decide(&state(), &item, &MatchResult::none());

        assert_eq!(decision.status, ItemStatus::NeedsReview);
        assert_eq!(decision.reason.as_deref(), Some(NO_MATCH_REASON));
        let review = decision.review.unwrap();
        assert!(review.alternatives.is_empty());
        assert_eq!(review.bom_id, 7);
        assert_eq!(review.title, "Review match: XYZ-1");
    }

    #[test]
    fn test_low_confidence_escalates_with_alternatives() {
        let item = LineItem::new(2, Decimal::ONE).with_description("10uF capacitor");
        let result = MatchResult::from_ranked(vec![candidate(1, 0.62), candidate(2, 0.55), candidate(3, 0.51)], 4);
        let decision = ReviewGate::new(0.8).decide(&state(), &item, &result);

        assert_eq!(decision.status, ItemStatus::NeedsReview);
        assert_eq!(decision.reason.as_deref(), Some("Low confidence match (62%)"));
        let review = decision.review.unwrap();
        assert_eq!(review.alternatives.len(), 2);
        assert_eq!(review.confidence, 0.62);
    }

    #[test]
    fn test_threshold_is_inclusive_for_matches() {
        let item = LineItem::new(1, Decimal::ONE);
        let result = MatchResult::from_ranked(vec![candidate(1, 0.8)], 4);
        let decision = ReviewGate::new(0.8).decide(&state(), &item, &result);

        assert_eq!(decision.status, ItemStatus::Matched);
        assert!(decision.review.is_none());
        assert!(!ReviewGate::run_needs_review(&[decision]));
    }
}
