//! Journal operation models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BatchAllocation;
use crate::types::Department;

/// An immutable ledger document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub document_number: String,
    pub operation_date: DateTime<Utc>,
    pub department: Department,
    pub responsible_person: String,
    pub items: Vec<OperationItem>,
    pub total_value: Decimal,
    pub status: OperationStatus,
    pub details: Option<OperationDetails>,
    /// Inventory document that produced this operation, if any
    pub related_inventory_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One preparation line of an operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationItem {
    pub id: Uuid,
    pub preparation_id: Uuid,
    pub preparation_name: String,
    pub quantity: Decimal,
    pub unit: String,
    /// FIFO slices for depleting operations; empty for receipts
    pub batch_allocations: Vec<BatchAllocation>,
    /// Batch created by a receipt line
    pub batch_id: Option<Uuid>,
    pub total_cost: Decimal,
    pub average_cost_per_unit: Decimal,
    pub expiry_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl OperationItem {
    pub fn allocated_quantity(&self) -> Decimal {
        self.batch_allocations.iter().map(|a| a.quantity).sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Receipt,
    Consumption,
    Correction,
    Inventory,
    WriteOff,
}

impl OperationType {
    /// Prefix used in document numbers
    pub fn document_prefix(&self) -> &'static str {
        match self {
            OperationType::Receipt => "REC",
            OperationType::Consumption => "CON",
            OperationType::Correction => "COR",
            OperationType::Inventory => "INV",
            OperationType::WriteOff => "WO",
        }
    }

    /// Whether this operation takes stock out through FIFO allocation
    pub fn is_depleting(&self) -> bool {
        matches!(
            self,
            OperationType::Consumption | OperationType::Correction | OperationType::WriteOff
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Draft,
    Confirmed,
}

/// Structured reason attached to a depleting operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationDetails {
    Consumption(ConsumptionDetails),
    Correction(CorrectionDetails),
    WriteOff(WriteOffDetails),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumptionDetails {
    pub reason: ConsumptionReason,
    /// Recipe or menu item id
    pub related_id: Option<Uuid>,
    pub related_name: Option<String>,
    pub portion_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionReason {
    Recipe,
    MenuItem,
    Waste,
    Expired,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrectionDetails {
    pub reason: CorrectionReason,
    pub related_id: Option<Uuid>,
    pub related_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionReason {
    Waste,
    Expired,
    Damage,
    Theft,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteOffDetails {
    pub reason: WriteOffReason,
    pub affects_kpi: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WriteOffReason {
    Expired,
    Spoiled,
    Contaminated,
    Overproduced,
    QualityControl,
    Education,
    Test,
    Other,
}

impl WriteOffReason {
    pub const ALL: [WriteOffReason; 8] = [
        WriteOffReason::Expired,
        WriteOffReason::Spoiled,
        WriteOffReason::Contaminated,
        WriteOffReason::Overproduced,
        WriteOffReason::QualityControl,
        WriteOffReason::Education,
        WriteOffReason::Test,
        WriteOffReason::Other,
    ];

    /// Training and recipe testing are planned usage, not loss
    pub fn affects_kpi(&self) -> bool {
        !matches!(self, WriteOffReason::Education | WriteOffReason::Test)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOffReason::Expired => "expired",
            WriteOffReason::Spoiled => "spoiled",
            WriteOffReason::Contaminated => "contaminated",
            WriteOffReason::Overproduced => "overproduced",
            WriteOffReason::QualityControl => "quality_control",
            WriteOffReason::Education => "education",
            WriteOffReason::Test => "test",
            WriteOffReason::Other => "other",
        }
    }
}

impl std::fmt::Display for WriteOffReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOffReason::Expired => write!(f, "Expired"),
            WriteOffReason::Spoiled => write!(f, "Spoiled"),
            WriteOffReason::Contaminated => write!(f, "Contaminated"),
            WriteOffReason::Overproduced => write!(f, "Overproduced"),
            WriteOffReason::QualityControl => write!(f, "Quality Control"),
            WriteOffReason::Education => write!(f, "Education"),
            WriteOffReason::Test => write!(f, "Recipe Testing"),
            WriteOffReason::Other => write!(f, "Other Loss"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kpi_classification() {
        let non_kpi: Vec<_> = WriteOffReason::ALL
            .iter()
            .filter(|r| !r.affects_kpi())
            .collect();
        assert_eq!(non_kpi, vec![&WriteOffReason::Education, &WriteOffReason::Test]);
    }

    #[test]
    fn test_depleting_types() {
        assert!(OperationType::Consumption.is_depleting());
        assert!(OperationType::WriteOff.is_depleting());
        assert!(!OperationType::Receipt.is_depleting());
        assert!(!OperationType::Inventory.is_depleting());
    }

    #[test]
    fn test_details_are_tagged() {
        let details = OperationDetails::Correction(CorrectionDetails {
            reason: CorrectionReason::Theft,
            related_id: None,
            related_name: None,
        });
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["kind"], "correction");
        assert_eq!(json["reason"], "theft");
    }
}
