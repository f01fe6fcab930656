//! Reconciliation of negative batches against new production
//!
//! Each settled shortfall produces an offset entry valued at the negative
//! batch's own unit cost, so the expense booked when stock went negative
//! and its reversal net to zero. Failures are per batch: a batch that
//! could not be settled stays outstanding for the next pass, and the retry
//! sends the same offset id so the sink books it once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use prep_shared::{Batch, OffsetEntry, ReconciliationSummary};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::batch_ledger::BatchLedger;
use super::negative_batch::{settle, NegativeBatchTracker};
use crate::error::{LedgerResult, StoreError};
use crate::locks::StockKey;
use crate::store::{OffsetSink, WriteSet};

/// Offset id for settling `covered` units of `batch` in its stored state.
///
/// A failed settle leaves the stored batch untouched, so the next attempt
/// derives the same id. Any committed change to the batch (a partial
/// settle, a consolidation, an undo) moves `updated_at` and yields a new id.
fn offset_id(batch: &Batch, covered: Decimal) -> Uuid {
    let name = format!("{}:{}", batch.updated_at.to_rfc3339(), covered.normalize());
    Uuid::new_v5(&batch.id, name.as_bytes())
}

/// Settles outstanding negative batches and emits offset entries
#[derive(Clone)]
pub struct ReconciliationEngine {
    ledger: BatchLedger,
    tracker: NegativeBatchTracker,
    sink: Arc<dyn OffsetSink>,
    failures: Arc<AtomicU64>,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub entries: Vec<OffsetEntry>,
    /// Negative batches left outstanding because a write failed
    pub failed: Vec<Uuid>,
}

impl ReconciliationReport {
    pub fn total_amount(&self) -> Decimal {
        self.entries.iter().map(|e| e.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.failed.is_empty()
    }
}

impl ReconciliationEngine {
    pub fn new(ledger: BatchLedger, tracker: NegativeBatchTracker, sink: Arc<dyn OffsetSink>) -> Self {
        Self {
            ledger,
            tracker,
            sink,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Batches that failed to reconcile since startup
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Settle every outstanding negative batch of a preparation
    pub async fn reconcile(&self, preparation_id: Uuid) -> LedgerResult<ReconciliationReport> {
        self.reconcile_against(preparation_id, None).await
    }

    /// Settle outstanding negative batches oldest first.
    ///
    /// With a `cap`, at most that many units are offset in total; the batch
    /// the cap runs out on is reduced and stays outstanding.
    pub async fn reconcile_against(
        &self,
        preparation_id: Uuid,
        cap: Option<Decimal>,
    ) -> LedgerResult<ReconciliationReport> {
        let pending = self.tracker.outstanding(preparation_id).await?;
        if pending.is_empty() {
            return Ok(ReconciliationReport::default());
        }

        let locked: HashSet<StockKey> = pending
            .iter()
            .map(|b| (b.preparation_id, b.department))
            .collect();
        let _guards = self.ledger.locks().acquire_many(locked.iter().copied()).await;

        // Another pass may have settled some of them while we waited. Batches
        // that appeared under a key we do not hold wait for the next pass.
        let pending: Vec<Batch> = self
            .tracker
            .outstanding(preparation_id)
            .await?
            .into_iter()
            .filter(|b| locked.contains(&(b.preparation_id, b.department)))
            .collect();
        let mut remaining = cap;
        let mut report = ReconciliationReport::default();

        for batch in pending {
            let owed = batch.current_quantity.abs();
            let covered = match remaining {
                Some(left) => owed.min(left),
                None => owed,
            };
            if covered <= Decimal::ZERO {
                break;
            }

            match self.settle_batch(batch, covered).await {
                Ok(entry) => {
                    if let Some(left) = remaining.as_mut() {
                        *left -= covered;
                    }
                    report.entries.push(entry);
                }
                Err((batch_id, err)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(%batch_id, %preparation_id, error = %err, "Failed to reconcile negative batch");
                    report.failed.push(batch_id);
                }
            }
        }

        if !report.entries.is_empty() {
            tracing::info!(
                %preparation_id,
                settled = report.entries.len(),
                failed = report.failed.len(),
                amount = %report.total_amount(),
                "Reconciled negative batches"
            );
        }
        Ok(report)
    }

    async fn settle_batch(
        &self,
        mut batch: Batch,
        covered: Decimal,
    ) -> Result<OffsetEntry, (Uuid, StoreError)> {
        let now = Utc::now();
        let entry = OffsetEntry {
            id: offset_id(&batch, covered),
            negative_batch_id: batch.id,
            negative_batch_number: batch.batch_number.clone(),
            preparation_id: batch.preparation_id,
            department: batch.department,
            quantity: covered,
            cost_per_unit: batch.cost_per_unit,
            amount: covered * batch.cost_per_unit,
            description: format!("Reconciliation of negative batch {}", batch.batch_number),
            created_at: now,
        };

        self.sink
            .record_offset(&entry)
            .await
            .map_err(|err| (batch.id, err))?;

        if covered >= batch.current_quantity.abs() {
            settle(&mut batch, now);
        } else {
            batch.current_quantity += covered;
            batch.recompute_value();
            batch.updated_at = now;
        }

        let batch_id = batch.id;
        if let Err(err) = self.ledger.store().commit(WriteSet::batch(batch)).await {
            tracing::warn!(
                %batch_id,
                offset_id = %entry.id,
                "Offset recorded but negative batch could not be updated"
            );
            return Err((batch_id, err));
        }
        Ok(entry)
    }

    /// Outstanding shortfall of a preparation; no side effects
    pub async fn summary(&self, preparation_id: Uuid) -> LedgerResult<ReconciliationSummary> {
        let outstanding = self.tracker.outstanding(preparation_id).await?;
        Ok(ReconciliationSummary {
            has_negative_batches: !outstanding.is_empty(),
            total_negative_quantity: outstanding.iter().map(|b| b.current_quantity.abs()).sum(),
            negative_batch_count: outstanding.len(),
            estimated_value: outstanding
                .iter()
                .map(|b| b.current_quantity.abs() * b.cost_per_unit)
                .sum(),
        })
    }
}
