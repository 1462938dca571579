//! Groups orderable line items by their resolved supplier.

use indexmap::IndexMap;
use rust_decimal::Decimal;

use procura_models::{add_cost, CostOverflow, LineItem, PoGroup, SupplierId};

#[derive(Debug, Clone, Copy, Default)]
pub struct GroupingEngine;

impl GroupingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Partitions matched or confirmed items with a resolved supplier into
    /// one group per supplier. Groups appear in order of their first item and
    /// keep input order within; ineligible items are ignored. Fails when a
    /// line cost or subtotal does not fit in a `Decimal`.
    pub fn group(&self, items: &[LineItem]) -> Result<Vec<PoGroup>, CostOverflow> {
        let mut groups: IndexMap<SupplierId, PoGroup> = IndexMap::new();

        for item in items.iter().filter(|i| i.status.is_orderable()) {
            let Some(best) = item.match_result.best.as_ref() else {
                continue;
            };

            let group = groups.entry(best.supplier_id).or_insert_with(|| PoGroup {
                supplier_id: best.supplier_id,
                supplier_name: best.supplier_name.clone(),
                items: Vec::new(),
                subtotal: Decimal::ZERO,
                price_warnings: Vec::new(),
            });

            match item.extended_cost()? {
                Some(cost) => group.subtotal = add_cost(group.subtotal, cost, item.line_number)?,
                None => group.price_warnings.push(item.line_number),
            }
            group.items.push(item.clone());
        }

        Ok(groups.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_models::{ItemStatus, MatchCandidate, MatchMethod, MatchResult};
    use proptest::prelude::*;

    fn item(line: u32, supplier_id: i64, status: ItemStatus, price: Option<i64>, qty: i64) -> LineItem {
        let mut item = LineItem::new(line, Decimal::new(qty, 0)).with_part_number(format!("P-{}", line));
        item.status = status;
        item.match_result = MatchResult {
            best: Some(MatchCandidate {
                supplier_id,
                supplier_name: format!("Supplier {}", supplier_id),
                supplier_part_id: Some(supplier_id * 1000 + line as i64),
                part_id: Some(line as i64),
                part_number: item.part_number_raw.clone(),
                supplier_part_number: None,
                unit_price: price.map(|p| Decimal::new(p, 2)),
                lead_time_days: None,
                is_preferred: false,
                confidence: 1.0,
                method: MatchMethod::Exact,
            }),
            alternatives: Vec::new(),
        };
        item
    }

    #[test]
    fn test_groups_by_supplier_in_input_order() {
        let items = vec![
            item(1, 5, ItemStatus::Confirmed, Some(150), 2),
            item(2, 9, ItemStatus::Matched, Some(1000), 1),
            item(3, 5, ItemStatus::Confirmed, Some(25), 4),
        ];

        let groups = GroupingEngine::new().group(&items).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].supplier_id, 5);
        assert_eq!(groups[0].items.iter().map(|i| i.line_number).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(groups[0].subtotal, Decimal::new(400, 2));
        assert_eq!(groups[1].supplier_id, 9);
        assert_eq!(groups[1].items.len(), 1);
        assert_eq!(groups[1].subtotal, Decimal::new(1000, 2));
    }

    #[test]
    fn test_unpriced_items_are_flagged_not_dropped() {
        let items = vec![item(1, 5, ItemStatus::Matched, None, 3), item(2, 5, ItemStatus::Matched, Some(100), 3)];

        let groups = GroupingEngine::new().group(&items).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].items.len(), 2);
        assert_eq!(groups[0].price_warnings, vec![1]);
        assert_eq!(groups[0].subtotal, Decimal::new(300, 2));
    }

    #[test]
    fn test_ineligible_items_are_skipped() {
        let mut unmatched = LineItem::new(3, Decimal::ONE);
        unmatched.status = ItemStatus::NeedsReview;
        let items = vec![item(1, 5, ItemStatus::NeedsReview, Some(100), 1), item(2, 5, ItemStatus::Pending, Some(100), 1), unmatched];

        assert!(GroupingEngine::new().group(&items).unwrap().is_empty());
    }

    #[test]
    fn test_subtotal_overflow_is_an_error() {
        let mut huge = item(2, 5, ItemStatus::Matched, Some(100), 1);
        huge.quantity = Decimal::MAX;
        let items = vec![item(1, 5, ItemStatus::Matched, Some(100), 1), huge];

        let err = GroupingEngine::new().group(&items).unwrap_err();
        assert_eq!(err.line_number, 2);
    }

    prop_compose! {
        fn arb_item(line: u32)(
            supplier_id in 1i64..4,
            confirmed in any::<bool>(),
            price in proptest::option::of(1i64..10_000),
            qty in 1i64..100,
        ) -> LineItem {
            let status = if confirmed { ItemStatus::Confirmed } else { ItemStatus::Matched };
            item(line, supplier_id, status, price, qty)
        }
    }

    fn arb_items() -> impl Strategy<Value = Vec<LineItem>> {
        (0usize..12).prop_flat_map(|n| (1..=n as u32).map(arb_item).collect::<Vec<_>>())
    }

    proptest! {
        #[test]
        fn prop_grouping_is_idempotent_and_complete(items in arb_items()) {
            let engine = GroupingEngine::new();
            let first = engine.group(&items).unwrap();
            let second = engine.group(&items).unwrap();
            prop_assert_eq!(&first, &second);

            let grouped: usize = first.iter().map(|g| g.items.len()).sum();
            prop_assert_eq!(grouped, items.len());
            prop_assert!(first.iter().all(|g| !g.items.is_empty()));
        }
    }
}
