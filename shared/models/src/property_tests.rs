//! Property-based tests for Procura core domain models
//!
//! These cover the ordering and bounding rules of match results and the
//! monotonic progress of run states.

use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{MatchCandidate, MatchMethod, MatchResult, RunStage, RunState, MAX_ALTERNATIVES};

prop_compose! {
    fn arb_candidate()(
        supplier_id in 1i64..20,
        offer in 1i64..5,
        confidence in 0.0f64..=1.0,
        preferred in any::<bool>(),
        price in proptest::option::of(1i64..100_000),
    ) -> MatchCandidate {
        MatchCandidate {
            supplier_id,
            supplier_name: format!("Supplier {}", supplier_id),
            supplier_part_id: Some(supplier_id * 10 + offer),
            part_id: Some(offer),
            part_number: Some(format!("P{}", offer)),
            supplier_part_number: None,
            unit_price: price.map(|p| Decimal::new(p, 2)),
            lead_time_days: None,
            is_preferred: preferred,
            confidence,
            method: MatchMethod::Fuzzy,
        }
    }
}

proptest! {
    #[test]
    fn prop_alternatives_bounded_and_disjoint(
        candidates in proptest::collection::vec(arb_candidate(), 0..20),
        max in 0usize..10,
    ) {
        let result = MatchResult::from_ranked(candidates.clone(), max);

        prop_assert!(result.alternatives.len() <= MAX_ALTERNATIVES);
        prop_assert!(result.alternatives.len() <= max);
        prop_assert_eq!(result.best.is_none(), candidates.is_empty());
        if let Some(best) = &result.best {
            prop_assert!(result.alternatives.iter().all(|c| !c.same_offer(best)));
        }
    }

    #[test]
    fn prop_best_ranks_first(candidates in proptest::collection::vec(arb_candidate(), 1..20)) {
        let result = MatchResult::from_ranked(candidates.clone(), 4);
        let best = result.best.unwrap();

        for candidate in &candidates {
            prop_assert!(best.rank_cmp(candidate) != std::cmp::Ordering::Greater);
        }
        for pair in result.alternatives.windows(2) {
            prop_assert!(pair[0].rank_cmp(&pair[1]) != std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn prop_progress_is_monotonic(checkpoints in proptest::collection::vec(-10.0f64..120.0, 1..30)) {
        let mut state = RunState::new(Uuid::new_v4(), 1, "BOM")
            .transition(RunStage::Matching, 25.0, "Parsed")
            .unwrap();
        let mut last = state.progress;

        for progress in checkpoints {
            state = state.checkpoint(progress, "Matching").unwrap();
            prop_assert!(state.progress >= last);
            prop_assert!((0.0..=100.0).contains(&state.progress));
            last = state.progress;
        }
    }
}
