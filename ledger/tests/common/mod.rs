//! Shared fixtures for the ledger integration tests

#![allow(dead_code)]

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use prep_ledger::services::{ConsumptionRequest, ReceiptItem, ReceiptRequest, StockItem};
use prep_ledger::store::{
    BatchFilter, LedgerStore, MemoryCatalogue, MemoryOffsetSink, MemoryStore, WriteSet,
};
use prep_ledger::{LedgerConfig, LedgerResult, PrepLedger, StoreError, StoreResult};
use prep_shared::{
    Balance, Batch, BatchSourceType, ConsumptionDetails, ConsumptionReason, Department,
    InventoryDocument, Operation, PreparationInfo, ShortagePolicy,
};
use rust_decimal::Decimal;
use uuid::Uuid;

// Helper to create Decimal from string
pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Single-line recipe consumption
pub fn consumption(
    preparation_id: Uuid,
    department: Department,
    quantity: &str,
    policy: ShortagePolicy,
) -> ConsumptionRequest {
    ConsumptionRequest {
        department,
        responsible_person: "Line Cook".to_string(),
        items: vec![StockItem {
            preparation_id,
            quantity: dec(quantity),
            notes: None,
        }],
        details: ConsumptionDetails {
            reason: ConsumptionReason::Recipe,
            related_id: None,
            related_name: Some("Risotto".to_string()),
            portion_count: Some(4),
        },
        notes: None,
        policy,
    }
}

pub struct Fixture {
    pub ledger: PrepLedger,
    pub catalogue: Arc<MemoryCatalogue>,
    pub offsets: Arc<MemoryOffsetSink>,
}

pub fn fixture() -> Fixture {
    fixture_with(LedgerConfig::default())
}

pub fn fixture_with(config: LedgerConfig) -> Fixture {
    let (ledger, catalogue, offsets) = PrepLedger::in_memory(config);
    Fixture {
        ledger,
        catalogue,
        offsets,
    }
}

/// In-memory store that can be told to fail its next writes
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_commits: AtomicUsize,
    failing_balance_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_balance_writes(&self, count: usize) {
        self.failing_balance_writes.store(count, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn commit(&self, write: WriteSet) -> StoreResult<()> {
        if Self::take(&self.failing_commits) {
            return Err(StoreError::Unavailable("commit refused".to_string()));
        }
        self.inner.commit(write).await
    }

    async fn batch(&self, id: Uuid) -> StoreResult<Option<Batch>> {
        self.inner.batch(id).await
    }

    async fn batches(&self, filter: &BatchFilter) -> StoreResult<Vec<Batch>> {
        self.inner.batches(filter).await
    }

    async fn operation(&self, id: Uuid) -> StoreResult<Option<Operation>> {
        self.inner.operation(id).await
    }

    async fn operations(&self, department: Option<Department>) -> StoreResult<Vec<Operation>> {
        self.inner.operations(department).await
    }

    async fn save_inventory(&self, document: &InventoryDocument) -> StoreResult<()> {
        self.inner.save_inventory(document).await
    }

    async fn inventory(&self, id: Uuid) -> StoreResult<Option<InventoryDocument>> {
        self.inner.inventory(id).await
    }

    async fn inventories(
        &self,
        department: Option<Department>,
    ) -> StoreResult<Vec<InventoryDocument>> {
        self.inner.inventories(department).await
    }

    async fn replace_balances(
        &self,
        department: Department,
        balances: Vec<Balance>,
    ) -> StoreResult<()> {
        if Self::take(&self.failing_balance_writes) {
            return Err(StoreError::Unavailable("balance table locked".to_string()));
        }
        self.inner.replace_balances(department, balances).await
    }

    async fn balances(&self, department: Option<Department>) -> StoreResult<Vec<Balance>> {
        self.inner.balances(department).await
    }

    async fn next_sequence(&self, counter: &str) -> StoreResult<u64> {
        self.inner.next_sequence(counter).await
    }
}

/// Fixture over a [`FlakyStore`], returned alongside it
pub fn flaky_fixture() -> (Fixture, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let catalogue = Arc::new(MemoryCatalogue::new());
    let offsets = Arc::new(MemoryOffsetSink::new());
    let ledger = PrepLedger::new(
        store.clone(),
        catalogue.clone(),
        offsets.clone(),
        LedgerConfig::default(),
    );
    (
        Fixture {
            ledger,
            catalogue,
            offsets,
        },
        store,
    )
}

impl Fixture {
    /// Register a preparation in the catalogue
    pub fn preparation(&self, name: &str, last_known_cost: Option<Decimal>) -> Uuid {
        let id = Uuid::new_v4();
        self.catalogue
            .insert(PreparationInfo {
                id,
                name: name.to_string(),
                base_unit: "gram".to_string(),
                last_known_cost,
            })
            .unwrap();
        id
    }

    /// Receive one line produced `days_ago` days before now
    pub async fn receive(
        &self,
        preparation_id: Uuid,
        department: Department,
        quantity: &str,
        cost: &str,
        days_ago: i64,
    ) -> Operation {
        self.ledger
            .journal()
            .receive(ReceiptRequest {
                department,
                responsible_person: "Chef Anna".to_string(),
                items: vec![ReceiptItem {
                    preparation_id,
                    quantity: dec(quantity),
                    cost_per_unit: dec(cost),
                    production_date: Some(Utc::now() - Duration::days(days_ago)),
                    expiry_date: None,
                    notes: None,
                }],
                source_type: BatchSourceType::Production,
                notes: None,
            })
            .await
            .unwrap()
    }

    pub async fn consume(
        &self,
        preparation_id: Uuid,
        department: Department,
        quantity: &str,
        policy: ShortagePolicy,
    ) -> LedgerResult<Operation> {
        self.ledger
            .journal()
            .consume(consumption(preparation_id, department, quantity, policy))
            .await
    }

    /// Sum of current quantities over the active batches of a key
    pub async fn active_quantity(&self, preparation_id: Uuid, department: Department) -> Decimal {
        self.ledger
            .batches()
            .list_active_batches(preparation_id, department)
            .await
            .unwrap()
            .iter()
            .map(|b| b.current_quantity)
            .sum()
    }
}
