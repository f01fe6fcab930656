//! Ledger services for the preparation inventory

pub mod balance;
pub mod batch_ledger;
pub mod journal;
pub mod negative_batch;
pub mod reconciliation;
pub mod reporting;

pub use balance::{compute_balances, BalanceAggregator};
pub use batch_ledger::{plan_fifo, BatchLedger, NewBatch};
pub use journal::{
    ConsumptionRequest, CorrectionRequest, CountEntry, OperationJournal, ReceiptItem,
    ReceiptRequest, StockItem, WriteOffRequest,
};
pub use negative_batch::{CostBasis, CostBasisOrigin, NegativeBatchTracker, ShortfallRequest};
pub use reconciliation::{ReconciliationEngine, ReconciliationReport};
pub use reporting::{
    DepartmentStatistics, DepartmentWriteOffs, ReasonBreakdown, ReportingService,
    WriteOffStatistics,
};
