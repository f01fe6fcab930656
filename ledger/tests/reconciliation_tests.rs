//! Reconciliation tests
//!
//! Tests for settling negative batches including:
//! - Offsets are valued at the negative batch's own cost
//! - Receipts trigger reconciliation
//! - Capped reconciliation leaves the uncovered part outstanding
//! - A failing offset write skips the batch and keeps it outstanding
//! - Retrying after a failed batch update books no second offset

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{dec, fixture, fixture_with, flaky_fixture};
use prep_ledger::services::ShortfallRequest;
use prep_ledger::store::{MemoryCatalogue, MemoryStore, OffsetSink};
use prep_ledger::{LedgerConfig, PrepLedger, StoreError, StoreResult};
use prep_shared::{BatchStatus, Department, OffsetEntry, PreparationInfo, ShortfallSource};
use rust_decimal::Decimal;
use uuid::Uuid;

fn shortfall(preparation_id: Uuid, department: Department, quantity: &str, cost: &str) -> ShortfallRequest {
    ShortfallRequest {
        preparation_id,
        department,
        quantity: dec(quantity),
        cost_per_unit: dec(cost),
        reason: "POS sale without stock".to_string(),
        source: ShortfallSource::PosOrder,
        affected_recipe_ids: vec![Uuid::new_v4()],
    }
}

/// Offset sink that refuses entries for one department
struct FailingSink {
    fail_for: Department,
    entries: Mutex<Vec<OffsetEntry>>,
}

#[async_trait]
impl OffsetSink for FailingSink {
    async fn record_offset(&self, entry: &OffsetEntry) -> StoreResult<()> {
        if entry.department == self.fail_for {
            return Err(StoreError::Unavailable("general ledger offline".to_string()));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[tokio::test]
    async fn test_offset_uses_negative_batch_cost() {
        let f = fixture();
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        let negative = f
            .ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "100", "50"))
            .await
            .unwrap();

        // New production is cheaper and smaller than the shortfall
        f.receive(bisque, Department::Kitchen, "10", "80", 0).await;

        let entries = f.offsets.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].negative_batch_id, negative.id);
        assert_eq!(entries[0].quantity, dec("100"));
        assert_eq!(entries[0].cost_per_unit, dec("50"));
        assert_eq!(entries[0].amount, dec("5000"));

        let settled = f.ledger.batches().batch(negative.id).await.unwrap().unwrap();
        assert!(settled.reconciled_at().is_some());
        assert_eq!(settled.status, BatchStatus::Depleted);
        assert!(!settled.is_active);

        let balance = f
            .ledger
            .balances()
            .balance(bisque, Department::Kitchen)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(balance.total_quantity, dec("10"));
    }

    #[tokio::test]
    async fn test_reconcile_settles_oldest_first_across_departments() {
        let f = fixture();
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        let tracker = f.ledger.negatives();
        let kitchen = tracker
            .record_shortfall(shortfall(bisque, Department::Kitchen, "10", "50"))
            .await
            .unwrap();
        let bar = tracker
            .record_shortfall(shortfall(bisque, Department::Bar, "4", "45"))
            .await
            .unwrap();

        let report = f.ledger.reconciliation().reconcile(bisque).await.unwrap();

        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].negative_batch_id, kitchen.id);
        assert_eq!(report.entries[1].negative_batch_id, bar.id);
        assert_eq!(report.total_amount(), dec("680"));
        assert!(report.failed.is_empty());
        assert!(!tracker.has_outstanding(bisque).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_without_outstanding_is_noop() {
        let f = fixture();
        let bisque = f.preparation("Lobster Bisque", None);
        f.receive(bisque, Department::Kitchen, "10", "80", 0).await;

        let report = f.ledger.reconciliation().reconcile(bisque).await.unwrap();
        assert!(report.is_empty());
        assert!(f.offsets.entries().is_empty());
    }

    #[tokio::test]
    async fn test_summary_is_read_only() {
        let f = fixture();
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        f.ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "30", "50"))
            .await
            .unwrap();
        f.ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Bar, "5", "40"))
            .await
            .unwrap();

        let summary = f.ledger.reconciliation().summary(bisque).await.unwrap();
        assert!(summary.has_negative_batches);
        assert_eq!(summary.negative_batch_count, 2);
        assert_eq!(summary.total_negative_quantity, dec("35"));
        assert_eq!(summary.estimated_value, dec("1700"));

        let again = f.ledger.reconciliation().summary(bisque).await.unwrap();
        assert_eq!(summary, again);
        assert!(f.offsets.entries().is_empty());
    }

    #[tokio::test]
    async fn test_capped_reconciliation_leaves_remainder_outstanding() {
        let mut config = LedgerConfig::default();
        config.reconciliation.cap_to_receipt = true;
        let f = fixture_with(config);
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        let negative = f
            .ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "100", "50"))
            .await
            .unwrap();

        f.receive(bisque, Department::Kitchen, "40", "80", 0).await;

        let entries = f.offsets.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quantity, dec("40"));
        assert_eq!(entries[0].amount, dec("2000"));
        let partial = f.ledger.batches().batch(negative.id).await.unwrap().unwrap();
        assert_eq!(partial.current_quantity, dec("-60"));
        assert!(partial.is_outstanding_negative());

        f.receive(bisque, Department::Kitchen, "100", "80", 0).await;

        let entries = f.offsets.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].amount, dec("3000"));
        assert!(!f.ledger.negatives().has_outstanding(bisque).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_offset_keeps_batch_outstanding() {
        let catalogue = Arc::new(MemoryCatalogue::new());
        let sink = Arc::new(FailingSink {
            fail_for: Department::Bar,
            entries: Mutex::new(Vec::new()),
        });
        let ledger = PrepLedger::new(
            Arc::new(MemoryStore::new()),
            catalogue.clone(),
            sink.clone(),
            LedgerConfig::default(),
        );
        let bisque = Uuid::new_v4();
        catalogue
            .insert(PreparationInfo {
                id: bisque,
                name: "Lobster Bisque".to_string(),
                base_unit: "ml".to_string(),
                last_known_cost: Some(dec("50")),
            })
            .unwrap();

        let bar = ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Bar, "5", "50"))
            .await
            .unwrap();
        let kitchen = ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "10", "50"))
            .await
            .unwrap();

        let report = ledger.reconciliation().reconcile(bisque).await.unwrap();

        assert_eq!(report.failed, vec![bar.id]);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].negative_batch_id, kitchen.id);
        assert_eq!(ledger.reconciliation().failure_count(), 1);
        assert_eq!(sink.entries.lock().unwrap().len(), 1);

        let outstanding = ledger.negatives().outstanding(bisque).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].id, bar.id);
        assert_eq!(outstanding[0].current_quantity, dec("-5"));
    }

    #[tokio::test]
    async fn test_undo_after_reconciliation_reopens_shortfall() {
        let f = fixture();
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        let negative = f
            .ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "20", "50"))
            .await
            .unwrap();
        f.ledger.reconciliation().reconcile(bisque).await.unwrap();

        f.ledger.negatives().undo_reconciliation(negative.id).await.unwrap();
        assert_eq!(f.offsets.entries().len(), 1);

        let summary = f.ledger.reconciliation().summary(bisque).await.unwrap();
        assert_eq!(summary.negative_batch_count, 1);
        assert_eq!(summary.total_negative_quantity, dec("20"));
        assert_eq!(summary.estimated_value, dec("1000"));
        assert_eq!(
            f.ledger.balances().recompute(Some(Department::Kitchen)).await.unwrap()[0].total_quantity,
            dec("-20")
        );
        assert_eq!(Decimal::ZERO, f.active_quantity(bisque, Department::Bar).await);
    }

    #[tokio::test]
    async fn test_retry_after_failed_batch_update_books_offset_once() {
        let (f, store) = flaky_fixture();
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        let negative = f
            .ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "100", "50"))
            .await
            .unwrap();

        store.fail_next_commits(1);
        let report = f.ledger.reconciliation().reconcile(bisque).await.unwrap();
        assert_eq!(report.failed, vec![negative.id]);
        assert!(report.entries.is_empty());
        assert_eq!(f.offsets.entries().len(), 1);
        assert!(f.ledger.negatives().has_outstanding(bisque).await.unwrap());

        let report = f.ledger.reconciliation().reconcile(bisque).await.unwrap();
        assert!(report.failed.is_empty());
        assert_eq!(report.total_amount(), dec("5000"));

        let entries = f.offsets.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, report.entries[0].id);
        assert_eq!(entries[0].amount, dec("5000"));
        assert!(!f.ledger.negatives().has_outstanding(bisque).await.unwrap());
    }

    #[tokio::test]
    async fn test_reopened_shortfall_is_offset_again() {
        let f = fixture();
        let bisque = f.preparation("Lobster Bisque", Some(dec("50")));
        let negative = f
            .ledger
            .negatives()
            .record_shortfall(shortfall(bisque, Department::Kitchen, "20", "50"))
            .await
            .unwrap();
        f.ledger.reconciliation().reconcile(bisque).await.unwrap();
        f.ledger.negatives().undo_reconciliation(negative.id).await.unwrap();

        let report = f.ledger.reconciliation().reconcile(bisque).await.unwrap();

        assert_eq!(report.entries.len(), 1);
        let entries = f.offsets.entries();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].id, entries[1].id);
        assert!(!f.ledger.negatives().has_outstanding(bisque).await.unwrap());
    }
}
