//! Derived on-hand balance models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Department;

/// Aggregated stock of one preparation in one department.
///
/// Always recomputed from the live batch set; never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Balance {
    pub preparation_id: Uuid,
    pub preparation_name: String,
    pub department: Department,
    /// May be zero or negative while shortfalls are unreconciled
    pub total_quantity: Decimal,
    pub unit: String,
    pub total_value: Decimal,
    pub average_cost: Decimal,
    pub latest_cost: Decimal,
    pub cost_trend: CostTrend,
    /// Ids of the active batches in FIFO order
    pub batch_ids: Vec<Uuid>,
    pub oldest_batch_date: DateTime<Utc>,
    pub newest_batch_date: DateTime<Utc>,
    pub has_expired: bool,
    pub has_near_expiry: bool,
    pub below_min_stock: bool,
    pub last_calculated: DateTime<Utc>,
}

/// Direction of unit cost between the oldest and newest active batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CostTrend {
    Up,
    Down,
    Stable,
}

impl CostTrend {
    /// Compare `latest` against `oldest` with a symmetric relative band,
    /// e.g. 0.05 for ±5%.
    pub fn classify(oldest: Decimal, latest: Decimal, band: Decimal) -> Self {
        if latest > oldest * (Decimal::ONE + band) {
            CostTrend::Up
        } else if latest < oldest * (Decimal::ONE - band) {
            CostTrend::Down
        } else {
            CostTrend::Stable
        }
    }
}
