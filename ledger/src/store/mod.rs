//! Persistence and catalogue collaborators
//!
//! The ledger never talks to a database directly. It reads and writes
//! through these traits; `memory` provides implementations that keep
//! everything in process.

mod memory;

use async_trait::async_trait;
use prep_shared::{Balance, Batch, Department, InventoryDocument, OffsetEntry, Operation, PreparationInfo};
use uuid::Uuid;

use crate::error::StoreResult;

pub use memory::{MemoryCatalogue, MemoryOffsetSink, MemoryStore};

/// Query over stored batches. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub preparation_id: Option<Uuid>,
    pub department: Option<Department>,
    pub active_only: bool,
    pub negative: Option<bool>,
    pub reconciled: Option<bool>,
}

impl BatchFilter {
    pub fn active(preparation_id: Uuid, department: Department) -> Self {
        Self {
            preparation_id: Some(preparation_id),
            department: Some(department),
            active_only: true,
            ..Self::default()
        }
    }

    /// Unreconciled negative batches of a preparation across departments
    pub fn outstanding_negative(preparation_id: Uuid) -> Self {
        Self {
            preparation_id: Some(preparation_id),
            negative: Some(true),
            reconciled: Some(false),
            ..Self::default()
        }
    }

    pub fn matches(&self, batch: &Batch) -> bool {
        if let Some(id) = self.preparation_id {
            if batch.preparation_id != id {
                return false;
            }
        }
        if let Some(department) = self.department {
            if batch.department != department {
                return false;
            }
        }
        if self.active_only && !batch.is_active {
            return false;
        }
        if let Some(negative) = self.negative {
            if batch.is_negative() != negative {
                return false;
            }
        }
        if let Some(reconciled) = self.reconciled {
            if batch.reconciled_at().is_some() != reconciled {
                return false;
            }
        }
        true
    }
}

/// Changes persisted together: either all of them land or none do
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    /// Inserted or replaced by id
    pub batches: Vec<Batch>,
    /// Appended to the journal
    pub operations: Vec<Operation>,
    /// Inserted or replaced by id
    pub inventories: Vec<InventoryDocument>,
}

impl WriteSet {
    pub fn batch(batch: Batch) -> Self {
        Self {
            batches: vec![batch],
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.operations.is_empty() && self.inventories.is_empty()
    }
}

/// Batch, journal and balance storage
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Apply a write set atomically
    async fn commit(&self, write: WriteSet) -> StoreResult<()>;

    async fn batch(&self, id: Uuid) -> StoreResult<Option<Batch>>;

    async fn batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>>;

    async fn operation(&self, id: Uuid) -> StoreResult<Option<Operation>>;

    async fn operations(&self, department: Option<Department>) -> StoreResult<Vec<Operation>>;

    async fn save_inventory(&self, document: &InventoryDocument) -> StoreResult<()>;

    async fn inventory(&self, id: Uuid) -> StoreResult<Option<InventoryDocument>>;

    async fn inventories(&self, department: Option<Department>)
        -> StoreResult<Vec<InventoryDocument>>;

    /// Replace every cached balance of a department
    async fn replace_balances(&self, department: Department, balances: Vec<Balance>)
        -> StoreResult<()>;

    async fn balances(&self, department: Option<Department>) -> StoreResult<Vec<Balance>>;

    /// Next value of a named counter, starting at 1
    async fn next_sequence(&self, counter: &str) -> StoreResult<u64>;
}

/// Preparation catalogue lookup
#[async_trait]
pub trait Catalogue: Send + Sync {
    async fn preparation(&self, id: Uuid) -> StoreResult<Option<PreparationInfo>>;
}

/// External ledger receiving reconciliation offsets
#[async_trait]
pub trait OffsetSink: Send + Sync {
    /// Book an offset. An entry whose id was already booked must be
    /// accepted without booking it again; retries reuse the same id.
    async fn record_offset(&self, entry: &OffsetEntry) -> StoreResult<()>;
}
