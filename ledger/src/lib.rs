//! Preparation Ledger - batch-level FIFO costing for kitchen and bar stock
//!
//! Stock enters as batches with their own unit cost and leaves through
//! FIFO allocation. Shortfalls are kept as negative batches until new
//! production reconciles them. [`PrepLedger`] wires the services over one
//! store; create as many as needed, nothing is global.

pub mod config;
pub mod error;
pub mod locks;
pub mod services;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

pub use self::config::LedgerConfig;
pub use error::{ErrorDetail, LedgerError, LedgerResult, StoreError, StoreResult};

use locks::KeyLocks;
use services::{
    BalanceAggregator, BatchLedger, NegativeBatchTracker, OperationJournal, ReconciliationEngine,
    ReportingService,
};
use store::{Catalogue, LedgerStore, MemoryCatalogue, MemoryOffsetSink, MemoryStore, OffsetSink};

/// Handle to one ledger instance
#[derive(Clone)]
pub struct PrepLedger {
    config: Arc<LedgerConfig>,
    batches: BatchLedger,
    negatives: NegativeBatchTracker,
    balances: BalanceAggregator,
    journal: OperationJournal,
    reconciliation: ReconciliationEngine,
    reporting: ReportingService,
}

impl PrepLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalogue: Arc<dyn Catalogue>,
        offsets: Arc<dyn OffsetSink>,
        config: LedgerConfig,
    ) -> Self {
        let config = Arc::new(config);
        let locks = Arc::new(KeyLocks::new());

        let batches = BatchLedger::new(store.clone(), catalogue.clone(), locks);
        let negatives = NegativeBatchTracker::new(batches.clone());
        let balances = BalanceAggregator::new(store.clone(), catalogue, config.balance.clone());
        let reconciliation = ReconciliationEngine::new(batches.clone(), negatives.clone(), offsets);
        let journal = OperationJournal::new(
            batches.clone(),
            negatives.clone(),
            balances.clone(),
            reconciliation.clone(),
            config.clone(),
        );
        let reporting = ReportingService::new(store, balances.clone());

        Self {
            config,
            batches,
            negatives,
            balances,
            journal,
            reconciliation,
            reporting,
        }
    }

    /// Ledger over in-memory collaborators, returned alongside them so the
    /// caller can seed the catalogue and inspect offsets
    pub fn in_memory(config: LedgerConfig) -> (Self, Arc<MemoryCatalogue>, Arc<MemoryOffsetSink>) {
        let catalogue = Arc::new(MemoryCatalogue::new());
        let offsets = Arc::new(MemoryOffsetSink::new());
        let ledger = Self::new(
            Arc::new(MemoryStore::new()),
            catalogue.clone(),
            offsets.clone(),
            config,
        );
        (ledger, catalogue, offsets)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn batches(&self) -> &BatchLedger {
        &self.batches
    }

    pub fn negatives(&self) -> &NegativeBatchTracker {
        &self.negatives
    }

    pub fn balances(&self) -> &BalanceAggregator {
        &self.balances
    }

    pub fn journal(&self) -> &OperationJournal {
        &self.journal
    }

    pub fn reconciliation(&self) -> &ReconciliationEngine {
        &self.reconciliation
    }

    pub fn reporting(&self) -> &ReportingService {
        &self.reporting
    }
}
