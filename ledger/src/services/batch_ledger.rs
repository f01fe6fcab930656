//! Batch ledger: batch creation, FIFO allocation and depletion

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prep_shared::{
    generate_batch_number, validate_cost_per_unit, validate_expiry, validate_quantity, Batch,
    BatchAllocation, BatchSourceType, BatchStatus, Department, FifoAllocation, PreparationInfo,
};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::locks::{KeyLocks, StockKey};
use crate::store::{BatchFilter, Catalogue, LedgerStore, WriteSet};

/// Owns the batches of every (preparation, department) pair
#[derive(Clone)]
pub struct BatchLedger {
    store: Arc<dyn LedgerStore>,
    catalogue: Arc<dyn Catalogue>,
    locks: Arc<KeyLocks>,
}

/// Input for creating a positive batch
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub preparation_id: Uuid,
    pub department: Department,
    pub quantity: Decimal,
    pub cost_per_unit: Decimal,
    pub production_date: DateTime<Utc>,
    pub source_type: BatchSourceType,
    pub expiry_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Oldest production first; creation time breaks ties
fn fifo_order(a: &&Batch, b: &&Batch) -> Ordering {
    a.production_date
        .cmp(&b.production_date)
        .then(a.created_at.cmp(&b.created_at))
}

/// Walk the FIFO queue of `batches` for `requested` units.
///
/// Only active positive batches with stock are considered. Nothing is
/// mutated; a non-zero remainder signals a shortage.
pub fn plan_fifo(batches: &[Batch], requested: Decimal) -> FifoAllocation {
    let mut queue: Vec<&Batch> = batches
        .iter()
        .filter(|b| b.is_active && !b.is_negative() && b.current_quantity > Decimal::ZERO)
        .collect();
    queue.sort_by(fifo_order);

    let mut remaining = requested.max(Decimal::ZERO);
    let mut allocations = Vec::new();

    for batch in queue {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = batch.current_quantity.min(remaining);
        allocations.push(BatchAllocation {
            batch_id: batch.id,
            batch_number: batch.batch_number.clone(),
            quantity: take,
            cost_per_unit: batch.cost_per_unit,
            batch_date: batch.production_date,
        });
        remaining -= take;
    }

    FifoAllocation {
        allocations,
        remainder: remaining,
    }
}

/// Working copy of the stock behind a set of keys.
///
/// Several allocations are planned against the copy so that two lines for
/// the same preparation never spend the same batch twice. Nothing reaches
/// the store until the caller commits [`StockSnapshot::into_changed`].
pub(crate) struct StockSnapshot {
    batches: HashMap<StockKey, Vec<Batch>>,
    changed: BTreeSet<Uuid>,
}

impl StockSnapshot {
    /// Plan and deplete the working copy
    pub(crate) fn allocate(
        &mut self,
        key: StockKey,
        requested: Decimal,
        at: DateTime<Utc>,
    ) -> FifoAllocation {
        let batches = self.batches.entry(key).or_default();
        let plan = plan_fifo(batches, requested);
        for allocation in &plan.allocations {
            if let Some(batch) = batches.iter_mut().find(|b| b.id == allocation.batch_id) {
                batch.deplete(allocation.quantity, at);
                self.changed.insert(batch.id);
            }
        }
        plan
    }

    pub(crate) fn available(&self, key: StockKey) -> Decimal {
        self.batches
            .get(&key)
            .map(|batches| {
                batches
                    .iter()
                    .filter(|b| b.is_active && !b.is_negative())
                    .map(|b| b.current_quantity.max(Decimal::ZERO))
                    .sum()
            })
            .unwrap_or(Decimal::ZERO)
    }

    /// Outstanding negative batch of a key, if any
    pub(crate) fn negative_mut(&mut self, key: StockKey) -> Option<&mut Batch> {
        let batch = self
            .batches
            .get_mut(&key)?
            .iter_mut()
            .find(|b| b.is_active && b.is_outstanding_negative())?;
        self.changed.insert(batch.id);
        Some(batch)
    }

    /// Most recent active positive batch of a key
    pub(crate) fn latest_positive(&self, key: StockKey) -> Option<&Batch> {
        self.batches
            .get(&key)?
            .iter()
            .filter(|b| b.is_active && !b.is_negative() && b.current_quantity > Decimal::ZERO)
            .max_by(|a, b| fifo_order(a, b))
    }

    pub(crate) fn insert(&mut self, batch: Batch) {
        self.changed.insert(batch.id);
        self.batches
            .entry((batch.preparation_id, batch.department))
            .or_default()
            .push(batch);
    }

    pub(crate) fn into_changed(self) -> Vec<Batch> {
        let changed = self.changed;
        self.batches
            .into_values()
            .flatten()
            .filter(|b| changed.contains(&b.id))
            .collect()
    }
}

impl BatchLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalogue: Arc<dyn Catalogue>,
        locks: Arc<KeyLocks>,
    ) -> Self {
        Self {
            store,
            catalogue,
            locks,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub(crate) fn locks(&self) -> &Arc<KeyLocks> {
        &self.locks
    }

    /// Catalogue record of a preparation; unknown ids are a validation error
    pub async fn preparation_info(&self, preparation_id: Uuid) -> LedgerResult<PreparationInfo> {
        self.catalogue
            .preparation(preparation_id)
            .await?
            .ok_or(LedgerError::UnknownPreparation(preparation_id))
    }

    /// Create and persist a positive batch.
    ///
    /// Low-level primitive: balances are not refreshed and outstanding
    /// negative batches are not reconciled. Production should be booked
    /// through `OperationJournal::receive`, which does both.
    pub async fn create_batch(&self, new: NewBatch) -> LedgerResult<Batch> {
        let info = self.preparation_info(new.preparation_id).await?;
        let _guard = self.locks.acquire((new.preparation_id, new.department)).await;

        let batch = self.build_batch(&new, &info).await?;
        self.store.commit(WriteSet::batch(batch.clone())).await?;

        tracing::info!(
            batch_number = %batch.batch_number,
            preparation = %info.name,
            department = %batch.department,
            quantity = %batch.initial_quantity,
            cost_per_unit = %batch.cost_per_unit,
            "Batch created"
        );
        Ok(batch)
    }

    /// Validate and assemble a batch without persisting it
    pub(crate) async fn build_batch(
        &self,
        new: &NewBatch,
        info: &PreparationInfo,
    ) -> LedgerResult<Batch> {
        validate_quantity(new.quantity).map_err(|m| LedgerError::validation("quantity", m))?;
        validate_cost_per_unit(new.cost_per_unit)
            .map_err(|m| LedgerError::validation("cost_per_unit", m))?;
        validate_expiry(new.production_date, new.expiry_date)
            .map_err(|m| LedgerError::validation("expiry_date", m))?;

        let sequence = self.store.next_sequence("batch").await?;
        let now = Utc::now();

        Ok(Batch {
            id: Uuid::new_v4(),
            batch_number: generate_batch_number(&info.name, sequence, new.production_date),
            preparation_id: new.preparation_id,
            department: new.department,
            initial_quantity: new.quantity,
            current_quantity: new.quantity,
            unit: info.base_unit.clone(),
            cost_per_unit: new.cost_per_unit,
            total_value: new.quantity * new.cost_per_unit,
            production_date: new.production_date,
            expiry_date: new.expiry_date,
            source_type: new.source_type,
            status: BatchStatus::Active,
            is_active: true,
            notes: new.notes.clone(),
            negative: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Active batches of a preparation in a department, oldest first
    pub async fn list_active_batches(
        &self,
        preparation_id: Uuid,
        department: Department,
    ) -> LedgerResult<Vec<Batch>> {
        let mut batches = self
            .store
            .batches(&BatchFilter::active(preparation_id, department))
            .await?;
        batches.sort_by(|a, b| fifo_order(&a, &b));
        Ok(batches)
    }

    /// Preview the FIFO allocation for a quantity without touching stock.
    ///
    /// Unknown preparations simply have no batches, so the whole request
    /// comes back as remainder.
    pub async fn allocate_fifo(
        &self,
        preparation_id: Uuid,
        department: Department,
        requested: Decimal,
    ) -> LedgerResult<FifoAllocation> {
        let batches = self.list_active_batches(preparation_id, department).await?;
        let plan = plan_fifo(&batches, requested);
        tracing::debug!(
            %preparation_id,
            %department,
            %requested,
            slices = plan.allocations.len(),
            remainder = %plan.remainder,
            "FIFO allocation planned"
        );
        Ok(plan)
    }

    /// Deplete the batches referenced by `allocations` as one atomic write.
    ///
    /// Fails without changing anything if an allocation no longer fits the
    /// batch it points at (the stock moved since it was planned).
    pub async fn apply_allocations(&self, allocations: &[BatchAllocation]) -> LedgerResult<Vec<Batch>> {
        let mut batches: HashMap<Uuid, Batch> = HashMap::new();
        for allocation in allocations {
            if batches.contains_key(&allocation.batch_id) {
                continue;
            }
            let batch = self
                .store
                .batch(allocation.batch_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("Batch {}", allocation.batch_id)))?;
            batches.insert(batch.id, batch);
        }

        let keys: Vec<StockKey> = batches
            .values()
            .map(|b| (b.preparation_id, b.department))
            .collect();
        let _guards = self.locks.acquire_many(keys).await;

        // Re-read under the locks so the check sees committed state
        for batch in batches.values_mut() {
            if let Some(fresh) = self.store.batch(batch.id).await? {
                *batch = fresh;
            }
        }

        let now = Utc::now();
        for allocation in allocations {
            let batch = batches
                .get_mut(&allocation.batch_id)
                .ok_or_else(|| LedgerError::NotFound(format!("Batch {}", allocation.batch_id)))?;
            if !batch.is_active || batch.is_negative() || allocation.quantity > batch.current_quantity {
                return Err(StoreError::Conflict(format!(
                    "allocation of {} from batch {} exceeds its remaining {}",
                    allocation.quantity, batch.batch_number, batch.current_quantity
                ))
                .into());
            }
            batch.deplete(allocation.quantity, now);
        }

        let updated: Vec<Batch> = batches.into_values().collect();
        self.store
            .commit(WriteSet {
                batches: updated.clone(),
                ..WriteSet::default()
            })
            .await?;
        Ok(updated)
    }

    /// Load a working copy of the stock behind `keys`. Callers must hold
    /// the keys' locks for as long as they use the snapshot.
    pub(crate) async fn snapshot(&self, keys: &BTreeSet<StockKey>) -> LedgerResult<StockSnapshot> {
        let mut batches = HashMap::new();
        for &(preparation_id, department) in keys {
            let active = self
                .store
                .batches(&BatchFilter::active(preparation_id, department))
                .await?;
            batches.insert((preparation_id, department), active);
        }
        Ok(StockSnapshot {
            batches,
            changed: BTreeSet::new(),
        })
    }

    pub async fn batch(&self, id: Uuid) -> LedgerResult<Option<Batch>> {
        Ok(self.store.batch(id).await?)
    }

    /// Every stored batch, optionally limited to one department
    pub async fn batches(&self, department: Option<Department>) -> LedgerResult<Vec<Batch>> {
        let filter = BatchFilter {
            department,
            ..BatchFilter::default()
        };
        Ok(self.store.batches(&filter).await?)
    }
}
