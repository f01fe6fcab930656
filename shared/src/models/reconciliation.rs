//! Reconciliation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Department;

/// Offsetting entry that reverses the cost booked by a negative batch.
///
/// Valued at the negative batch's own unit cost so the original expense
/// and its reversal net to zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OffsetEntry {
    pub id: Uuid,
    pub negative_batch_id: Uuid,
    pub negative_batch_number: String,
    pub preparation_id: Uuid,
    pub department: Department,
    pub quantity: Decimal,
    pub cost_per_unit: Decimal,
    pub amount: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of the outstanding shortfall for a preparation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationSummary {
    pub has_negative_batches: bool,
    pub total_negative_quantity: Decimal,
    pub negative_batch_count: usize,
    pub estimated_value: Decimal,
}
