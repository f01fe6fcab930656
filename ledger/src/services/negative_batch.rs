//! Negative batch tracking for stock that went below zero
//!
//! A shortfall is never dropped: it becomes (or grows) a negative batch
//! costed at the last known unit cost, and stays outstanding until a
//! reconciliation settles it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prep_shared::{
    generate_negative_batch_number, validate_cost_per_unit, validate_quantity, Batch,
    BatchSourceType, BatchStatus, Department, NegativeBatchInfo, PreparationInfo,
    ShortfallSource,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::batch_ledger::{BatchLedger, StockSnapshot};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{BatchFilter, WriteSet};

/// Creates, consolidates and settles negative batches
#[derive(Clone)]
pub struct NegativeBatchTracker {
    ledger: BatchLedger,
    zero_cost_shortfalls: Arc<AtomicU64>,
}

/// A shortfall to record against a (preparation, department)
#[derive(Debug, Clone)]
pub struct ShortfallRequest {
    pub preparation_id: Uuid,
    pub department: Department,
    /// Positive number of missing units
    pub quantity: Decimal,
    pub cost_per_unit: Decimal,
    pub reason: String,
    pub source: ShortfallSource,
    pub affected_recipe_ids: Vec<Uuid>,
}

/// Where a shortfall's unit cost came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostBasisOrigin {
    LatestBatch,
    CachedCost,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostBasis {
    pub cost_per_unit: Decimal,
    pub source_batch_id: Option<Uuid>,
    pub origin: CostBasisOrigin,
}

impl NegativeBatchTracker {
    pub fn new(ledger: BatchLedger) -> Self {
        Self {
            ledger,
            zero_cost_shortfalls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of cost lookups that fell back to zero
    pub fn zero_cost_shortfalls(&self) -> u64 {
        self.zero_cost_shortfalls.load(Ordering::Relaxed)
    }

    /// Unit cost to book a shortfall at
    pub async fn cost_basis_for(&self, preparation_id: Uuid) -> LedgerResult<Decimal> {
        Ok(self.resolve_cost_basis(preparation_id).await?.cost_per_unit)
    }

    /// Latest active batch cost, then the catalogue's cached cost, then 0
    pub async fn resolve_cost_basis(&self, preparation_id: Uuid) -> LedgerResult<CostBasis> {
        let filter = BatchFilter {
            preparation_id: Some(preparation_id),
            active_only: true,
            negative: Some(false),
            ..BatchFilter::default()
        };
        let latest = self
            .ledger
            .store()
            .batches(&filter)
            .await?
            .into_iter()
            .filter(|b| b.current_quantity > Decimal::ZERO)
            .max_by(|a, b| {
                a.production_date
                    .cmp(&b.production_date)
                    .then(a.created_at.cmp(&b.created_at))
            });

        if let Some(batch) = latest {
            tracing::debug!(batch_number = %batch.batch_number, cost = %batch.cost_per_unit, "Using last batch cost");
            return Ok(CostBasis {
                cost_per_unit: batch.cost_per_unit,
                source_batch_id: Some(batch.id),
                origin: CostBasisOrigin::LatestBatch,
            });
        }

        let info = self.ledger.preparation_info(preparation_id).await?;
        Ok(self.cached_or_missing(&info))
    }

    fn cached_or_missing(&self, info: &PreparationInfo) -> CostBasis {
        match info.last_known_cost {
            Some(cost) if cost > Decimal::ZERO => {
                tracing::debug!(preparation = %info.name, %cost, "Using cached last known cost");
                CostBasis {
                    cost_per_unit: cost,
                    source_batch_id: None,
                    origin: CostBasisOrigin::CachedCost,
                }
            }
            _ => {
                self.zero_cost_shortfalls.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    preparation_id = %info.id,
                    preparation = %info.name,
                    "No cost history found; shortfall booked at zero cost understates COGS"
                );
                CostBasis {
                    cost_per_unit: Decimal::ZERO,
                    source_batch_id: None,
                    origin: CostBasisOrigin::Missing,
                }
            }
        }
    }

    /// Cost basis for a key whose latest positive batch was captured
    /// before its stock was allocated away
    pub(crate) async fn cost_basis_with(
        &self,
        latest: Option<&Batch>,
        info: &PreparationInfo,
    ) -> LedgerResult<CostBasis> {
        match latest {
            Some(batch) => Ok(CostBasis {
                cost_per_unit: batch.cost_per_unit,
                source_batch_id: Some(batch.id),
                origin: CostBasisOrigin::LatestBatch,
            }),
            None => self.resolve_cost_basis(info.id).await,
        }
    }

    /// Record a shortfall, growing the outstanding negative batch of the
    /// same (preparation, department) when there is one.
    pub async fn record_shortfall(&self, request: ShortfallRequest) -> LedgerResult<Batch> {
        validate_quantity(request.quantity).map_err(|m| LedgerError::validation("quantity", m))?;
        validate_cost_per_unit(request.cost_per_unit)
            .map_err(|m| LedgerError::validation("cost_per_unit", m))?;
        let info = self.ledger.preparation_info(request.preparation_id).await?;

        let key = (request.preparation_id, request.department);
        let _guard = self.ledger.locks().acquire(key).await;
        let keys = BTreeSet::from([key]);
        let mut snapshot = self.ledger.snapshot(&keys).await?;
        let source_batch_id = snapshot.latest_positive(key).map(|b| b.id);

        let batch = self
            .absorb_shortfall(&mut snapshot, &request, &info, source_batch_id, Utc::now())
            .await?;
        self.ledger
            .store()
            .commit(WriteSet {
                batches: snapshot.into_changed(),
                ..WriteSet::default()
            })
            .await?;
        Ok(batch)
    }

    /// Apply a shortfall to the working copy: consolidate into the
    /// outstanding negative batch or start a new one.
    pub(crate) async fn absorb_shortfall(
        &self,
        snapshot: &mut StockSnapshot,
        request: &ShortfallRequest,
        info: &PreparationInfo,
        source_batch_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> LedgerResult<Batch> {
        let key = (request.preparation_id, request.department);

        if let Some(existing) = snapshot.negative_mut(key) {
            existing.current_quantity -= request.quantity;
            existing.recompute_value();
            existing.updated_at = at;
            if let Some(negative) = existing.negative.as_mut() {
                for recipe in &request.affected_recipe_ids {
                    if !negative.affected_recipe_ids.contains(recipe) {
                        negative.affected_recipe_ids.push(*recipe);
                    }
                }
            }
            tracing::info!(
                batch_number = %existing.batch_number,
                added = %request.quantity,
                current_quantity = %existing.current_quantity,
                "Consolidated shortfall into negative batch"
            );
            return Ok(existing.clone());
        }

        let sequence = self.ledger.store().next_sequence("batch").await?;
        let quantity = -request.quantity;
        let batch = Batch {
            id: Uuid::new_v4(),
            batch_number: generate_negative_batch_number(&info.name, sequence, at),
            preparation_id: request.preparation_id,
            department: request.department,
            initial_quantity: quantity,
            current_quantity: quantity,
            unit: info.base_unit.clone(),
            cost_per_unit: request.cost_per_unit,
            total_value: quantity * request.cost_per_unit,
            production_date: at,
            expiry_date: None,
            source_type: BatchSourceType::Correction,
            status: BatchStatus::Active,
            is_active: true,
            notes: Some(request.reason.clone()),
            negative: Some(NegativeBatchInfo {
                source_batch_id,
                negative_created_at: at,
                negative_reason: request.reason.clone(),
                source_operation_type: request.source,
                affected_recipe_ids: request.affected_recipe_ids.clone(),
                reconciled_at: None,
            }),
            created_at: at,
            updated_at: at,
        };

        tracing::info!(
            batch_number = %batch.batch_number,
            quantity = %batch.current_quantity,
            cost_per_unit = %batch.cost_per_unit,
            "Created negative batch"
        );
        snapshot.insert(batch.clone());
        Ok(batch)
    }

    /// Unreconciled negative batches of a preparation, oldest shortfall first
    pub async fn outstanding(&self, preparation_id: Uuid) -> LedgerResult<Vec<Batch>> {
        let mut batches = self
            .ledger
            .store()
            .batches(&BatchFilter::outstanding_negative(preparation_id))
            .await?;
        batches.sort_by_key(|b| b.negative.as_ref().map(|n| n.negative_created_at));
        Ok(batches)
    }

    pub async fn has_outstanding(&self, preparation_id: Uuid) -> LedgerResult<bool> {
        Ok(!self.outstanding(preparation_id).await?.is_empty())
    }

    /// Total missing units across outstanding negative batches
    pub async fn total_outstanding_quantity(&self, preparation_id: Uuid) -> LedgerResult<Decimal> {
        Ok(self
            .outstanding(preparation_id)
            .await?
            .iter()
            .map(|b| b.current_quantity.abs())
            .sum())
    }

    async fn load_negative(&self, batch_id: Uuid) -> LedgerResult<Batch> {
        let batch = self
            .ledger
            .store()
            .batch(batch_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Batch {}", batch_id)))?;
        if !batch.is_negative() {
            return Err(LedgerError::InvalidStateTransition(format!(
                "batch {} is not a negative batch",
                batch.batch_number
            )));
        }
        Ok(batch)
    }

    /// Settle a negative batch
    pub async fn mark_reconciled(&self, batch_id: Uuid) -> LedgerResult<Batch> {
        let batch = self.load_negative(batch_id).await?;
        let _guard = self
            .ledger
            .locks()
            .acquire((batch.preparation_id, batch.department))
            .await;
        let mut batch = self.load_negative(batch_id).await?;

        if !batch.is_outstanding_negative() {
            return Err(LedgerError::InvalidStateTransition(format!(
                "negative batch {} is already reconciled",
                batch.batch_number
            )));
        }
        settle(&mut batch, Utc::now());
        self.ledger.store().commit(WriteSet::batch(batch.clone())).await?;

        tracing::info!(batch_number = %batch.batch_number, "Marked negative batch as reconciled");
        Ok(batch)
    }

    /// Reopen a reconciled negative batch
    pub async fn undo_reconciliation(&self, batch_id: Uuid) -> LedgerResult<Batch> {
        let batch = self.load_negative(batch_id).await?;
        let _guard = self
            .ledger
            .locks()
            .acquire((batch.preparation_id, batch.department))
            .await;
        let mut batch = self.load_negative(batch_id).await?;

        let Some(negative) = batch.negative.as_mut() else {
            return Err(LedgerError::InvalidStateTransition(format!(
                "batch {} is not a negative batch",
                batch.batch_number
            )));
        };
        if negative.reconciled_at.is_none() {
            return Err(LedgerError::InvalidStateTransition(format!(
                "negative batch {} is not reconciled",
                batch.batch_number
            )));
        }
        negative.reconciled_at = None;
        batch.status = BatchStatus::Active;
        batch.is_active = true;
        batch.updated_at = Utc::now();
        self.ledger.store().commit(WriteSet::batch(batch.clone())).await?;

        tracing::info!(batch_number = %batch.batch_number, "Reopened negative batch");
        Ok(batch)
    }
}

/// Move a negative batch to its terminal settled state
pub(crate) fn settle(batch: &mut Batch, at: DateTime<Utc>) {
    if let Some(negative) = batch.negative.as_mut() {
        negative.reconciled_at = Some(at);
    }
    batch.status = BatchStatus::Depleted;
    batch.is_active = false;
    batch.updated_at = at;
}
