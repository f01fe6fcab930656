//! Preparation batch models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Department;

/// A quantity of a preparation produced (or adjusted into existence) at a
/// point in time, carrying its own unit cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: Uuid,
    /// Human-readable number, e.g. "B-PREP-TOMA-004-20250204"
    pub batch_number: String,
    pub preparation_id: Uuid,
    pub department: Department,
    pub initial_quantity: Decimal,
    pub current_quantity: Decimal,
    pub unit: String,
    pub cost_per_unit: Decimal,
    pub total_value: Decimal,
    /// FIFO sort key
    pub production_date: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub source_type: BatchSourceType,
    pub status: BatchStatus,
    pub is_active: bool,
    pub notes: Option<String>,
    /// Present only on shortfall batches
    pub negative: Option<NegativeBatchInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a batch came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchSourceType {
    Production,
    Correction,
    OpeningBalance,
    InventoryAdjustment,
}

/// Lifecycle state of a batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Consumed,
    Expired,
    /// Terminal state of a reconciled negative batch
    Depleted,
}

/// Operation that drove stock below zero
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallSource {
    PosOrder,
    PreparationProduction,
    ManualWriteOff,
    Consumption,
    Correction,
}

/// Extension fields carried by a negative batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NegativeBatchInfo {
    /// Last active batch used as the cost basis
    pub source_batch_id: Option<Uuid>,
    pub negative_created_at: DateTime<Utc>,
    pub negative_reason: String,
    pub source_operation_type: ShortfallSource,
    pub affected_recipe_ids: Vec<Uuid>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn is_negative(&self) -> bool {
        self.negative.is_some()
    }

    /// A negative batch that has not yet been reconciled
    pub fn is_outstanding_negative(&self) -> bool {
        self.negative
            .as_ref()
            .map(|n| n.reconciled_at.is_none())
            .unwrap_or(false)
    }

    pub fn reconciled_at(&self) -> Option<DateTime<Utc>> {
        self.negative.as_ref().and_then(|n| n.reconciled_at)
    }

    pub fn recompute_value(&mut self) {
        self.total_value = self.current_quantity * self.cost_per_unit;
    }

    /// Take `quantity` out of a positive batch. The batch is closed as
    /// consumed once nothing is left.
    pub fn deplete(&mut self, quantity: Decimal, at: DateTime<Utc>) {
        self.current_quantity -= quantity;
        self.recompute_value();
        if self.current_quantity <= Decimal::ZERO {
            self.current_quantity = Decimal::ZERO;
            self.total_value = Decimal::ZERO;
            self.status = BatchStatus::Consumed;
            self.is_active = false;
        }
        self.updated_at = at;
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expiry_date.map(|e| e < at).unwrap_or(false)
    }
}

/// One slice of a FIFO allocation: how much was taken from which batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchAllocation {
    pub batch_id: Uuid,
    pub batch_number: String,
    pub quantity: Decimal,
    pub cost_per_unit: Decimal,
    pub batch_date: DateTime<Utc>,
}

impl BatchAllocation {
    pub fn cost(&self) -> Decimal {
        self.quantity * self.cost_per_unit
    }
}

/// Result of walking the FIFO queue for a requested quantity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FifoAllocation {
    pub allocations: Vec<BatchAllocation>,
    /// Quantity no batch could cover; non-zero means a shortage
    pub remainder: Decimal,
}

impl FifoAllocation {
    pub fn allocated_quantity(&self) -> Decimal {
        self.allocations.iter().map(|a| a.quantity).sum()
    }

    pub fn total_cost(&self) -> Decimal {
        self.allocations.iter().map(BatchAllocation::cost).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.remainder.is_zero()
    }
}

fn short_name(preparation_name: &str) -> String {
    let letters: String = preparation_name
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase())
        .take(4)
        .collect();
    if letters.is_empty() {
        "PREP".to_string()
    } else {
        letters
    }
}

/// Generate a batch number, e.g. "B-PREP-TOMA-004-20250204"
pub fn generate_batch_number(preparation_name: &str, sequence: u64, date: DateTime<Utc>) -> String {
    format!(
        "B-PREP-{}-{:03}-{}",
        short_name(preparation_name),
        sequence,
        date.format("%Y%m%d")
    )
}

/// Generate a shortfall batch number, e.g. "NEG-PREP-TOMA-005-20250204"
pub fn generate_negative_batch_number(
    preparation_name: &str,
    sequence: u64,
    date: DateTime<Utc>,
) -> String {
    format!(
        "NEG-PREP-{}-{:03}-{}",
        short_name(preparation_name),
        sequence,
        date.format("%Y%m%d")
    )
}
