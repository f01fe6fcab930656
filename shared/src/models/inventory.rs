//! Stock-count (inventory) document models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Department;

/// A stock-count session for one department
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryDocument {
    pub id: Uuid,
    pub document_number: String,
    pub inventory_date: DateTime<Utc>,
    pub department: Department,
    pub responsible_person: String,
    pub items: Vec<InventoryItem>,
    pub total_items: usize,
    pub total_discrepancies: usize,
    pub total_value_difference: Decimal,
    pub status: InventoryStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One counted preparation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
    pub id: Uuid,
    pub preparation_id: Uuid,
    pub preparation_name: String,
    pub system_quantity: Decimal,
    pub actual_quantity: Decimal,
    pub difference: Decimal,
    pub unit: String,
    pub average_cost: Decimal,
    pub value_difference: Decimal,
    pub notes: Option<String>,
    pub counted_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl InventoryItem {
    /// Set the counted quantity and refresh the derived differences
    pub fn record_actual(&mut self, actual_quantity: Decimal) {
        self.actual_quantity = actual_quantity;
        self.difference = actual_quantity - self.system_quantity;
        self.value_difference = self.difference * self.average_cost;
    }

    pub fn is_discrepancy(&self, tolerance: Decimal) -> bool {
        self.difference.abs() >= tolerance
    }
}

impl InventoryDocument {
    /// Refresh the document totals from its items
    pub fn recompute_totals(&mut self, tolerance: Decimal) {
        self.total_items = self.items.len();
        self.total_discrepancies = self
            .items
            .iter()
            .filter(|i| i.is_discrepancy(tolerance))
            .count();
        self.total_value_difference = self
            .items
            .iter()
            .filter(|i| i.is_discrepancy(tolerance))
            .map(|i| i.value_difference)
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item(system: &str, cost: &str) -> InventoryItem {
        InventoryItem {
            id: Uuid::new_v4(),
            preparation_id: Uuid::new_v4(),
            preparation_name: "Garlic Paste".to_string(),
            system_quantity: dec(system),
            actual_quantity: dec(system),
            difference: Decimal::ZERO,
            unit: "gram".to_string(),
            average_cost: dec(cost),
            value_difference: Decimal::ZERO,
            notes: None,
            counted_by: None,
        }
    }

    #[test]
    fn test_record_actual_computes_differences() {
        let mut i = item("500", "0.4");
        i.record_actual(dec("450"));
        assert_eq!(i.difference, dec("-50"));
        assert_eq!(i.value_difference, dec("-20.0"));
    }

    #[test]
    fn test_tolerance() {
        let tolerance = dec("0.01");
        let mut i = item("10", "1");
        i.record_actual(dec("10.005"));
        assert!(!i.is_discrepancy(tolerance));
        i.record_actual(dec("10.01"));
        assert!(i.is_discrepancy(tolerance));
    }
}
