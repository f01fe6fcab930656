//! Negative batch tests
//!
//! Tests for shortfall tracking including:
//! - Consolidation: repeated shortfalls grow one negative batch
//! - Cost basis fallbacks: latest batch, cached cost, zero
//! - Reconcile / undo lifecycle

mod common;

use common::{dec, fixture};
use prep_ledger::services::{CostBasisOrigin, ShortfallRequest};
use prep_ledger::LedgerError;
use prep_shared::{BatchSourceType, BatchStatus, Department, ShortagePolicy, ShortfallSource};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn shortfall(preparation_id: Uuid, department: Department, quantity: Decimal, cost: Decimal) -> ShortfallRequest {
    ShortfallRequest {
        preparation_id,
        department,
        quantity,
        cost_per_unit: cost,
        reason: "Sold while out of stock".to_string(),
        source: ShortfallSource::PosOrder,
        affected_recipe_ids: Vec::new(),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn test_shortfalls_consolidate_into_one_batch() {
        let f = fixture();
        let ragu = f.preparation("Ragu", Some(dec("8")));
        let tracker = f.ledger.negatives();

        let first = tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, dec("100"), dec("8")))
            .await
            .unwrap();
        let second = tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, dec("50"), dec("8")))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let outstanding = tracker.outstanding(ragu).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].current_quantity, dec("-150"));
        assert_eq!(outstanding[0].initial_quantity, dec("-100"));
        assert_eq!(outstanding[0].total_value, dec("-1200"));
        assert_eq!(outstanding[0].source_type, BatchSourceType::Correction);
        assert!(outstanding[0].batch_number.starts_with("NEG-PREP-RAGU-"));
        assert_eq!(tracker.total_outstanding_quantity(ragu).await.unwrap(), dec("150"));
    }

    #[tokio::test]
    async fn test_departments_get_separate_negative_batches() {
        let f = fixture();
        let ragu = f.preparation("Ragu", Some(dec("8")));
        let tracker = f.ledger.negatives();

        tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, dec("10"), dec("8")))
            .await
            .unwrap();
        tracker
            .record_shortfall(shortfall(ragu, Department::Bar, dec("5"), dec("8")))
            .await
            .unwrap();

        assert_eq!(tracker.outstanding(ragu).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_negative_policy_consolidates() {
        let f = fixture();
        let ragu = f.preparation("Ragu", Some(dec("8")));

        f.consume(ragu, Department::Kitchen, "100", ShortagePolicy::RecordNegative)
            .await
            .unwrap();
        f.consume(ragu, Department::Kitchen, "50", ShortagePolicy::RecordNegative)
            .await
            .unwrap();

        let outstanding = f.ledger.negatives().outstanding(ragu).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].current_quantity, dec("-150"));
    }

    #[tokio::test]
    async fn test_cost_basis_prefers_latest_batch() {
        let f = fixture();
        let jus = f.preparation("Jus", Some(dec("99")));
        f.receive(jus, Department::Kitchen, "10", "3", 3).await;
        f.receive(jus, Department::Bar, "10", "4", 1).await;

        let basis = f.ledger.negatives().resolve_cost_basis(jus).await.unwrap();
        assert_eq!(basis.cost_per_unit, dec("4"));
        assert_eq!(basis.origin, CostBasisOrigin::LatestBatch);
        assert!(basis.source_batch_id.is_some());
    }

    #[tokio::test]
    async fn test_cost_basis_falls_back_to_cached_cost() {
        let f = fixture();
        let jus = f.preparation("Jus", Some(dec("7")));

        let basis = f.ledger.negatives().resolve_cost_basis(jus).await.unwrap();
        assert_eq!(basis.cost_per_unit, dec("7"));
        assert_eq!(basis.origin, CostBasisOrigin::CachedCost);
        assert_eq!(f.ledger.negatives().zero_cost_shortfalls(), 0);
    }

    #[tokio::test]
    async fn test_cost_basis_without_history_is_zero_and_counted() {
        let f = fixture();
        let jus = f.preparation("Jus", None);

        let cost = f.ledger.negatives().cost_basis_for(jus).await.unwrap();
        assert_eq!(cost, Decimal::ZERO);
        assert_eq!(f.ledger.negatives().zero_cost_shortfalls(), 1);
    }

    #[tokio::test]
    async fn test_oversold_consumption_uses_cost_of_consumed_stock() {
        let f = fixture();
        let jus = f.preparation("Jus", None);
        f.receive(jus, Department::Kitchen, "20", "6", 1).await;

        let op = f
            .consume(jus, Department::Kitchen, "30", ShortagePolicy::RecordNegative)
            .await
            .unwrap();

        let allocations = &op.items[0].batch_allocations;
        assert_eq!(op.items[0].allocated_quantity(), dec("30"));
        assert_eq!(allocations[1].quantity, dec("10"));
        assert_eq!(allocations[1].cost_per_unit, dec("6"));

        let negative = &f.ledger.negatives().outstanding(jus).await.unwrap()[0];
        let info = negative.negative.as_ref().unwrap();
        assert_eq!(info.source_batch_id, op.items[0].batch_allocations.first().map(|a| a.batch_id));
        assert_eq!(info.source_operation_type, ShortfallSource::Consumption);
    }

    #[tokio::test]
    async fn test_reconcile_and_undo() {
        let f = fixture();
        let ragu = f.preparation("Ragu", Some(dec("8")));
        let tracker = f.ledger.negatives();
        let negative = tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, dec("20"), dec("8")))
            .await
            .unwrap();

        let settled = tracker.mark_reconciled(negative.id).await.unwrap();
        assert_eq!(settled.status, BatchStatus::Depleted);
        assert!(!settled.is_active);
        assert!(settled.reconciled_at().is_some());
        assert!(!tracker.has_outstanding(ragu).await.unwrap());

        let err = tracker.mark_reconciled(negative.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStateTransition(_)));

        let reopened = tracker.undo_reconciliation(negative.id).await.unwrap();
        assert_eq!(reopened.status, BatchStatus::Active);
        assert!(reopened.is_active);
        assert!(reopened.reconciled_at().is_none());
        assert!(tracker.has_outstanding(ragu).await.unwrap());
    }

    #[tokio::test]
    async fn test_undo_requires_a_reconciled_negative_batch() {
        let f = fixture();
        let ragu = f.preparation("Ragu", Some(dec("8")));
        let tracker = f.ledger.negatives();
        let negative = tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, dec("20"), dec("8")))
            .await
            .unwrap();

        let err = tracker.undo_reconciliation(negative.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStateTransition(_)));

        let receipt = f.receive(ragu, Department::Bar, "5", "8", 1).await;
        let positive = receipt.items[0].batch_id.unwrap();
        let err = tracker.undo_reconciliation(positive).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidStateTransition(_)));

        let err = tracker.undo_reconciliation(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_shortfall_validation() {
        let f = fixture();
        let ragu = f.preparation("Ragu", None);
        let tracker = f.ledger.negatives();

        let err = tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, Decimal::ZERO, dec("1")))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = tracker
            .record_shortfall(shortfall(ragu, Department::Kitchen, dec("1"), dec("-1")))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = tracker
            .record_shortfall(shortfall(Uuid::new_v4(), Department::Kitchen, dec("1"), dec("1")))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownPreparation(_)));
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

#[cfg(test)]
mod property_tests {
    use super::*;

    /// Strategy for shortfall quantities
    fn quantity_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..=10000i64).prop_map(|n| Decimal::new(n, 1)) // 0.1 to 1000.0
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any sequence of shortfalls on one key leaves exactly one
        /// negative batch holding their sum
        #[test]
        fn prop_consolidation(quantities in prop::collection::vec(quantity_strategy(), 1..8)) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let (count, current) = runtime.block_on(async {
                let f = fixture();
                let ragu = f.preparation("Ragu", Some(dec("8")));
                for q in &quantities {
                    f.ledger
                        .negatives()
                        .record_shortfall(shortfall(ragu, Department::Kitchen, *q, dec("8")))
                        .await
                        .unwrap();
                }
                let outstanding = f.ledger.negatives().outstanding(ragu).await.unwrap();
                (outstanding.len(), outstanding[0].current_quantity)
            });

            let total: Decimal = quantities.iter().sum();
            prop_assert_eq!(count, 1);
            prop_assert_eq!(current, -total);
        }
    }
}
