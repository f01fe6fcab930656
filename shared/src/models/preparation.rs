//! Catalogue record for a preparation

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the ledger needs to know about a preparation from the catalogue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreparationInfo {
    pub id: Uuid,
    pub name: String,
    pub base_unit: String,
    /// Cached cost used when no batch history is available
    pub last_known_cost: Option<Decimal>,
}
