//! In-process implementations of the store collaborators

use std::collections::HashMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use prep_shared::{Balance, Batch, Department, InventoryDocument, OffsetEntry, Operation, PreparationInfo};
use uuid::Uuid;

use super::{BatchFilter, Catalogue, LedgerStore, OffsetSink, WriteSet};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    batches: HashMap<Uuid, Batch>,
    /// Insertion order, so listings are stable
    batch_order: Vec<Uuid>,
    operations: Vec<Operation>,
    inventories: HashMap<Uuid, InventoryDocument>,
    balances: HashMap<Department, Vec<Balance>>,
    sequences: HashMap<String, u64>,
}

/// Ledger store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn commit(&self, write: WriteSet) -> StoreResult<()> {
        let mut tables = self.write()?;

        if let Some(duplicate) = write
            .operations
            .iter()
            .find(|op| tables.operations.iter().any(|existing| existing.id == op.id))
        {
            return Err(StoreError::Conflict(format!(
                "operation {} already recorded",
                duplicate.id
            )));
        }

        for batch in write.batches {
            if !tables.batches.contains_key(&batch.id) {
                tables.batch_order.push(batch.id);
            }
            tables.batches.insert(batch.id, batch);
        }
        tables.operations.extend(write.operations);
        for document in write.inventories {
            tables.inventories.insert(document.id, document);
        }
        Ok(())
    }

    async fn batch(&self, id: Uuid) -> StoreResult<Option<Batch>> {
        Ok(self.read()?.batches.get(&id).cloned())
    }

    async fn batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>> {
        let tables = self.read()?;
        Ok(tables
            .batch_order
            .iter()
            .filter_map(|id| tables.batches.get(id))
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    async fn operation(&self, id: Uuid) -> StoreResult<Option<Operation>> {
        Ok(self.read()?.operations.iter().find(|op| op.id == id).cloned())
    }

    async fn operations(&self, department: Option<Department>) -> StoreResult<Vec<Operation>> {
        Ok(self
            .read()?
            .operations
            .iter()
            .filter(|op| department.map_or(true, |d| op.department == d))
            .cloned()
            .collect())
    }

    async fn save_inventory(&self, document: &InventoryDocument) -> StoreResult<()> {
        self.write()?
            .inventories
            .insert(document.id, document.clone());
        Ok(())
    }

    async fn inventory(&self, id: Uuid) -> StoreResult<Option<InventoryDocument>> {
        Ok(self.read()?.inventories.get(&id).cloned())
    }

    async fn inventories(
        &self,
        department: Option<Department>,
    ) -> StoreResult<Vec<InventoryDocument>> {
        Ok(self
            .read()?
            .inventories
            .values()
            .filter(|doc| department.map_or(true, |d| doc.department == d))
            .cloned()
            .collect())
    }

    async fn replace_balances(
        &self,
        department: Department,
        balances: Vec<Balance>,
    ) -> StoreResult<()> {
        self.write()?.balances.insert(department, balances);
        Ok(())
    }

    async fn balances(&self, department: Option<Department>) -> StoreResult<Vec<Balance>> {
        let tables = self.read()?;
        let departments: Vec<Department> = match department {
            Some(d) => vec![d],
            None => Department::ALL.to_vec(),
        };
        Ok(departments
            .iter()
            .filter_map(|d| tables.balances.get(d))
            .flatten()
            .cloned()
            .collect())
    }

    async fn next_sequence(&self, counter: &str) -> StoreResult<u64> {
        let mut tables = self.write()?;
        let next = tables.sequences.entry(counter.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}

/// Catalogue backed by a map
#[derive(Default)]
pub struct MemoryCatalogue {
    preparations: RwLock<HashMap<Uuid, PreparationInfo>>,
}

impl MemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: PreparationInfo) -> StoreResult<()> {
        self.preparations
            .write()
            .map_err(|_| StoreError::Unavailable("catalogue lock poisoned".to_string()))?
            .insert(info.id, info);
        Ok(())
    }
}

#[async_trait]
impl Catalogue for MemoryCatalogue {
    async fn preparation(&self, id: Uuid) -> StoreResult<Option<PreparationInfo>> {
        Ok(self
            .preparations
            .read()
            .map_err(|_| StoreError::Unavailable("catalogue lock poisoned".to_string()))?
            .get(&id)
            .cloned())
    }
}

/// Offset sink that keeps every entry it receives
#[derive(Default)]
pub struct MemoryOffsetSink {
    entries: Mutex<Vec<OffsetEntry>>,
}

impl MemoryOffsetSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OffsetEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OffsetSink for MemoryOffsetSink {
    async fn record_offset(&self, entry: &OffsetEntry) -> StoreResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("offset sink lock poisoned".to_string()))?;
        if !entries.iter().any(|e| e.id == entry.id) {
            entries.push(entry.clone());
        }
        Ok(())
    }
}
