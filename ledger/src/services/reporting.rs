//! Reporting service for write-off analytics and department summaries

use std::collections::BTreeMap;
use std::sync::Arc;

use prep_shared::{DateRange, Department, OperationDetails, OperationType, WriteOffReason};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::balance::BalanceAggregator;
use crate::error::LedgerResult;
use crate::store::LedgerStore;

/// Reporting service
#[derive(Clone)]
pub struct ReportingService {
    store: Arc<dyn LedgerStore>,
    balances: BalanceAggregator,
}

/// Write-off totals for one reason
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasonBreakdown {
    pub reason: WriteOffReason,
    pub affects_kpi: bool,
    pub operations: usize,
    pub quantity: Decimal,
    pub value: Decimal,
}

/// Write-off totals for one department
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentWriteOffs {
    pub department: Department,
    pub operations: usize,
    pub value: Decimal,
}

/// Write-off report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteOffStatistics {
    pub total_operations: usize,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
    /// Losses counted against kitchen KPIs
    pub kpi_value: Decimal,
    /// Planned usage such as training and recipe testing
    pub non_kpi_value: Decimal,
    pub by_reason: Vec<ReasonBreakdown>,
    pub by_department: Vec<DepartmentWriteOffs>,
}

/// Stock overview of one department
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepartmentStatistics {
    pub department: Department,
    pub item_count: usize,
    pub total_value: Decimal,
    pub low_stock_count: usize,
    pub expiring_count: usize,
    pub expired_count: usize,
    /// Preparations whose balance is below zero
    pub negative_balance_count: usize,
}

impl ReportingService {
    pub fn new(store: Arc<dyn LedgerStore>, balances: BalanceAggregator) -> Self {
        Self { store, balances }
    }

    /// Summarize write-offs, optionally for one department and period
    pub async fn write_off_statistics(
        &self,
        department: Option<Department>,
        range: Option<DateRange>,
    ) -> LedgerResult<WriteOffStatistics> {
        let write_offs: Vec<_> = self
            .store
            .operations(department)
            .await?
            .into_iter()
            .filter(|op| op.operation_type == OperationType::WriteOff)
            .filter(|op| range.as_ref().map_or(true, |r| r.contains(op.operation_date)))
            .collect();

        let mut by_reason: BTreeMap<usize, ReasonBreakdown> = BTreeMap::new();
        let mut by_department: BTreeMap<Department, DepartmentWriteOffs> = BTreeMap::new();
        let mut stats = WriteOffStatistics {
            total_operations: write_offs.len(),
            total_quantity: Decimal::ZERO,
            total_value: Decimal::ZERO,
            kpi_value: Decimal::ZERO,
            non_kpi_value: Decimal::ZERO,
            by_reason: Vec::new(),
            by_department: Vec::new(),
        };

        for op in &write_offs {
            let reason = match &op.details {
                Some(OperationDetails::WriteOff(details)) => details.reason,
                _ => WriteOffReason::Other,
            };
            let quantity: Decimal = op.items.iter().map(|i| i.quantity).sum();

            stats.total_quantity += quantity;
            stats.total_value += op.total_value;
            if reason.affects_kpi() {
                stats.kpi_value += op.total_value;
            } else {
                stats.non_kpi_value += op.total_value;
            }

            // Keyed by position so reasons come out in their declared order
            let rank = WriteOffReason::ALL
                .iter()
                .position(|r| *r == reason)
                .unwrap_or(WriteOffReason::ALL.len());
            let entry = by_reason.entry(rank).or_insert_with(|| ReasonBreakdown {
                reason,
                affects_kpi: reason.affects_kpi(),
                operations: 0,
                quantity: Decimal::ZERO,
                value: Decimal::ZERO,
            });
            entry.operations += 1;
            entry.quantity += quantity;
            entry.value += op.total_value;

            let entry = by_department
                .entry(op.department)
                .or_insert_with(|| DepartmentWriteOffs {
                    department: op.department,
                    operations: 0,
                    value: Decimal::ZERO,
                });
            entry.operations += 1;
            entry.value += op.total_value;
        }

        stats.by_reason = by_reason.into_values().collect();
        stats.by_department = by_department.into_values().collect();
        Ok(stats)
    }

    /// Stock overview per department from the cached balances
    pub async fn department_statistics(&self) -> LedgerResult<Vec<DepartmentStatistics>> {
        let mut stats = Vec::with_capacity(Department::ALL.len());
        for department in Department::ALL {
            let balances = self.balances.balances(Some(department)).await?;
            stats.push(DepartmentStatistics {
                department,
                item_count: balances.len(),
                total_value: balances.iter().map(|b| b.total_value).sum(),
                low_stock_count: balances.iter().filter(|b| b.below_min_stock).count(),
                expiring_count: balances.iter().filter(|b| b.has_near_expiry).count(),
                expired_count: balances.iter().filter(|b| b.has_expired).count(),
                negative_balance_count: balances
                    .iter()
                    .filter(|b| b.total_quantity < Decimal::ZERO)
                    .count(),
            });
        }
        Ok(stats)
    }
}
