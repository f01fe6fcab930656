//! Operation journal: receipts, consumption, corrections, write-offs and
//! stock counts
//!
//! Every call validates its whole input first, then plans all stock
//! movements against a locked snapshot and persists batches together with
//! the operation document in one commit. A failure before that commit
//! leaves stock untouched. Work after the commit (balance refresh,
//! reconciliation) is logged and counted on failure, never returned: the
//! operation is recorded either way.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prep_shared::{
    format_document_number, validate_cost_per_unit, validate_counted_quantity, validate_expiry,
    validate_item_count, validate_quantity, validate_responsible_person, Batch, BatchAllocation,
    BatchSourceType, ConsumptionDetails, ConsumptionReason, CorrectionDetails, CorrectionReason,
    Department, InventoryDocument, InventoryItem, InventoryStatus, Operation, OperationDetails,
    OperationItem, OperationStatus, OperationType, PreparationInfo, ShortagePolicy,
    ShortfallSource, WriteOffDetails, WriteOffReason,
};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::balance::BalanceAggregator;
use super::batch_ledger::{BatchLedger, NewBatch, StockSnapshot};
use super::negative_batch::{NegativeBatchTracker, ShortfallRequest};
use super::reconciliation::ReconciliationEngine;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::locks::StockKey;
use crate::store::WriteSet;

/// Records operation documents and drives the stock movements behind them
#[derive(Clone)]
pub struct OperationJournal {
    ledger: BatchLedger,
    tracker: NegativeBatchTracker,
    balances: BalanceAggregator,
    reconciliation: ReconciliationEngine,
    config: Arc<LedgerConfig>,
    documents: Arc<Mutex<()>>,
    follow_up_failures: Arc<AtomicU64>,
}

/// One line of a receipt
#[derive(Debug, Clone)]
pub struct ReceiptItem {
    pub preparation_id: Uuid,
    pub quantity: Decimal,
    pub cost_per_unit: Decimal,
    /// Defaults to the time of the receipt
    pub production_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReceiptRequest {
    pub department: Department,
    pub responsible_person: String,
    pub items: Vec<ReceiptItem>,
    pub source_type: BatchSourceType,
    pub notes: Option<String>,
}

/// One line of a depleting operation
#[derive(Debug, Clone)]
pub struct StockItem {
    pub preparation_id: Uuid,
    pub quantity: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConsumptionRequest {
    pub department: Department,
    pub responsible_person: String,
    pub items: Vec<StockItem>,
    pub details: ConsumptionDetails,
    pub notes: Option<String>,
    pub policy: ShortagePolicy,
}

#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub department: Department,
    pub responsible_person: String,
    pub items: Vec<StockItem>,
    pub details: CorrectionDetails,
    pub notes: Option<String>,
    pub policy: ShortagePolicy,
}

#[derive(Debug, Clone)]
pub struct WriteOffRequest {
    pub department: Department,
    pub responsible_person: String,
    pub reason: WriteOffReason,
    pub items: Vec<StockItem>,
    pub notes: Option<String>,
    pub policy: ShortagePolicy,
}

/// A counted quantity for one preparation
#[derive(Debug, Clone)]
pub struct CountEntry {
    pub preparation_id: Uuid,
    pub actual_quantity: Decimal,
    pub notes: Option<String>,
    pub counted_by: Option<String>,
}

/// Everything a depleting operation needs besides its lines
struct Depletion {
    operation_type: OperationType,
    department: Department,
    responsible_person: String,
    details: OperationDetails,
    notes: Option<String>,
    policy: ShortagePolicy,
    shortfall_source: ShortfallSource,
    affected_recipe_ids: Vec<Uuid>,
    related_inventory_id: Option<Uuid>,
}

impl OperationJournal {
    pub fn new(
        ledger: BatchLedger,
        tracker: NegativeBatchTracker,
        balances: BalanceAggregator,
        reconciliation: ReconciliationEngine,
        config: Arc<LedgerConfig>,
    ) -> Self {
        Self {
            ledger,
            tracker,
            balances,
            reconciliation,
            config,
            documents: Arc::new(Mutex::new(())),
            follow_up_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Balance refreshes and reconciliations that failed after their
    /// operation was already recorded
    pub fn follow_up_failures(&self) -> u64 {
        self.follow_up_failures.load(Ordering::Relaxed)
    }

    async fn document_number(&self, operation_type: OperationType) -> LedgerResult<String> {
        let prefix = operation_type.document_prefix();
        let sequence = self.ledger.store().next_sequence(prefix).await?;
        Ok(format_document_number(prefix, sequence))
    }

    /// Look up every distinct preparation of a request up front
    async fn resolve(
        &self,
        ids: impl Iterator<Item = Uuid>,
    ) -> LedgerResult<HashMap<Uuid, PreparationInfo>> {
        let mut infos = HashMap::new();
        for id in ids {
            if !infos.contains_key(&id) {
                infos.insert(id, self.ledger.preparation_info(id).await?);
            }
        }
        Ok(infos)
    }

    /// Refresh balances after a commit. Returns false when the refresh failed.
    async fn refresh_balances(&self, department: Option<Department>) -> bool {
        match self.balances.recompute(department).await {
            Ok(_) => true,
            Err(err) => {
                self.follow_up_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    department = ?department,
                    error = %err,
                    "Balance refresh after a recorded operation failed"
                );
                false
            }
        }
    }

    // ========================================================================
    // Receipts
    // ========================================================================

    /// Create one batch per line and record a confirmed receipt.
    ///
    /// Outstanding negative batches of the received preparations are
    /// reconciled afterwards; a reconciliation problem never fails the
    /// receipt.
    pub async fn receive(&self, request: ReceiptRequest) -> LedgerResult<Operation> {
        let now = Utc::now();
        validate_receipt(&request, now)?;
        let infos = self.resolve(request.items.iter().map(|i| i.preparation_id)).await?;

        let department = request.department;
        let keys: BTreeSet<StockKey> = request
            .items
            .iter()
            .map(|i| (i.preparation_id, department))
            .collect();
        let guards = self.ledger.locks().acquire_many(keys).await;

        let (operation, batches) = self.build_receipt(&request, &infos, None, now).await?;
        self.ledger
            .store()
            .commit(WriteSet {
                batches,
                operations: vec![operation.clone()],
                ..WriteSet::default()
            })
            .await?;
        drop(guards);

        tracing::info!(
            document_number = %operation.document_number,
            %department,
            items = operation.items.len(),
            total_value = %operation.total_value,
            "Receipt recorded"
        );

        self.after_receipt(&operation).await;
        Ok(operation)
    }

    /// Assemble the batches and document of a receipt. Callers hold the
    /// locks of every line's key until the result is committed.
    async fn build_receipt(
        &self,
        request: &ReceiptRequest,
        infos: &HashMap<Uuid, PreparationInfo>,
        related_inventory_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> LedgerResult<(Operation, Vec<Batch>)> {
        let department = request.department;
        let mut batches = Vec::with_capacity(request.items.len());
        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let info = &infos[&item.preparation_id];
            let batch = self
                .ledger
                .build_batch(
                    &NewBatch {
                        preparation_id: item.preparation_id,
                        department,
                        quantity: item.quantity,
                        cost_per_unit: item.cost_per_unit,
                        production_date: item.production_date.unwrap_or(now),
                        source_type: request.source_type,
                        expiry_date: item.expiry_date,
                        notes: item.notes.clone(),
                    },
                    info,
                )
                .await?;

            items.push(OperationItem {
                id: Uuid::new_v4(),
                preparation_id: item.preparation_id,
                preparation_name: info.name.clone(),
                quantity: item.quantity,
                unit: info.base_unit.clone(),
                batch_allocations: Vec::new(),
                batch_id: Some(batch.id),
                total_cost: item.quantity * item.cost_per_unit,
                average_cost_per_unit: item.cost_per_unit,
                expiry_date: item.expiry_date,
                notes: item.notes.clone(),
            });
            batches.push(batch);
        }

        let operation = Operation {
            id: Uuid::new_v4(),
            operation_type: OperationType::Receipt,
            document_number: self.document_number(OperationType::Receipt).await?,
            operation_date: now,
            department,
            responsible_person: request.responsible_person.clone(),
            total_value: items.iter().map(|i| i.total_cost).sum(),
            items,
            status: OperationStatus::Confirmed,
            details: None,
            related_inventory_id,
            notes: request.notes.clone(),
            created_at: now,
        };
        Ok((operation, batches))
    }

    /// Refresh balances and reconcile after a recorded receipt
    async fn after_receipt(&self, receipt: &Operation) {
        let fresh = self.refresh_balances(Some(receipt.department)).await;
        let settled_any = self.reconcile_received(receipt).await;

        // Negative batches may live in another department
        if settled_any || !fresh {
            self.refresh_balances(None).await;
        }
    }

    /// Returns true when at least one negative batch was settled
    async fn reconcile_received(&self, receipt: &Operation) -> bool {
        let mut received: Vec<(Uuid, Decimal)> = Vec::new();
        for item in &receipt.items {
            match received.iter_mut().find(|(id, _)| *id == item.preparation_id) {
                Some((_, quantity)) => *quantity += item.quantity,
                None => received.push((item.preparation_id, item.quantity)),
            }
        }

        let mut settled_any = false;
        for (preparation_id, quantity) in received {
            let cap = self.config.reconciliation.cap_to_receipt.then_some(quantity);
            match self.reconciliation.reconcile_against(preparation_id, cap).await {
                Ok(report) => settled_any |= !report.entries.is_empty(),
                Err(err) => {
                    self.follow_up_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        %preparation_id,
                        document_number = %receipt.document_number,
                        error = %err,
                        "Reconciliation after receipt failed"
                    );
                }
            }
        }
        settled_any
    }

    // ========================================================================
    // Depleting operations
    // ========================================================================

    /// Take stock out for recipes, menu items or waste
    pub async fn consume(&self, request: ConsumptionRequest) -> LedgerResult<Operation> {
        let affected_recipe_ids = match (request.details.reason, request.details.related_id) {
            (ConsumptionReason::Recipe | ConsumptionReason::MenuItem, Some(id)) => vec![id],
            _ => Vec::new(),
        };
        self.deplete(
            Depletion {
                operation_type: OperationType::Consumption,
                department: request.department,
                responsible_person: request.responsible_person,
                details: OperationDetails::Consumption(request.details),
                notes: request.notes,
                policy: request.policy,
                shortfall_source: ShortfallSource::Consumption,
                affected_recipe_ids,
                related_inventory_id: None,
            },
            &request.items,
        )
        .await
    }

    /// Take stock out as a correction (waste, expiry, damage, theft)
    pub async fn correct(&self, request: CorrectionRequest) -> LedgerResult<Operation> {
        self.deplete(
            Depletion {
                operation_type: OperationType::Correction,
                department: request.department,
                responsible_person: request.responsible_person,
                details: OperationDetails::Correction(request.details),
                notes: request.notes,
                policy: request.policy,
                shortfall_source: ShortfallSource::Correction,
                affected_recipe_ids: Vec::new(),
                related_inventory_id: None,
            },
            &request.items,
        )
        .await
    }

    /// Write stock off with a KPI-classified reason
    pub async fn write_off(&self, request: WriteOffRequest) -> LedgerResult<Operation> {
        self.deplete(
            Depletion {
                operation_type: OperationType::WriteOff,
                department: request.department,
                responsible_person: request.responsible_person,
                details: OperationDetails::WriteOff(WriteOffDetails {
                    reason: request.reason,
                    affects_kpi: request.reason.affects_kpi(),
                    notes: request.notes.clone(),
                }),
                notes: request.notes,
                policy: request.policy,
                shortfall_source: ShortfallSource::ManualWriteOff,
                affected_recipe_ids: Vec::new(),
                related_inventory_id: None,
            },
            &request.items,
        )
        .await
    }

    async fn deplete(&self, depletion: Depletion, lines: &[StockItem]) -> LedgerResult<Operation> {
        validate_depletion(&depletion, lines)?;
        let infos = self.resolve(lines.iter().map(|l| l.preparation_id)).await?;

        let department = depletion.department;
        let keys: BTreeSet<StockKey> = lines
            .iter()
            .map(|l| (l.preparation_id, department))
            .collect();
        let guards = self.ledger.locks().acquire_many(keys.iter().copied()).await;
        let mut snapshot = self.ledger.snapshot(&keys).await?;
        let now = Utc::now();

        let operation = self
            .plan_depletion(depletion, lines, &infos, &mut snapshot, now)
            .await?;
        self.ledger
            .store()
            .commit(WriteSet {
                batches: snapshot.into_changed(),
                operations: vec![operation.clone()],
                ..WriteSet::default()
            })
            .await?;
        drop(guards);

        tracing::info!(
            document_number = %operation.document_number,
            operation_type = ?operation.operation_type,
            %department,
            items = operation.items.len(),
            total_value = %operation.total_value,
            "Operation recorded"
        );

        self.refresh_balances(Some(department)).await;
        Ok(operation)
    }

    /// Allocate every line against the snapshot and assemble the document.
    /// Nothing is persisted; the caller commits the snapshot's changes.
    async fn plan_depletion(
        &self,
        depletion: Depletion,
        lines: &[StockItem],
        infos: &HashMap<Uuid, PreparationInfo>,
        snapshot: &mut StockSnapshot,
        now: DateTime<Utc>,
    ) -> LedgerResult<Operation> {
        let department = depletion.department;
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let key = (line.preparation_id, department);
            let info = &infos[&line.preparation_id];
            let latest = snapshot.latest_positive(key).cloned();
            let available = snapshot.available(key);
            let plan = snapshot.allocate(key, line.quantity, now);
            let mut allocations = plan.allocations.clone();

            if !plan.is_complete() {
                match depletion.policy {
                    ShortagePolicy::Reject => {
                        tracing::debug!(
                            preparation = %info.name,
                            requested = %line.quantity,
                            missing = %plan.remainder,
                            "Rejecting operation on insufficient stock"
                        );
                        return Err(LedgerError::InsufficientStock {
                            preparation_id: line.preparation_id,
                            preparation_name: info.name.clone(),
                            requested: line.quantity,
                            available,
                            missing: plan.remainder,
                        });
                    }
                    ShortagePolicy::RecordNegative => {
                        let basis = self.tracker.cost_basis_with(latest.as_ref(), info).await?;
                        let negative = self
                            .tracker
                            .absorb_shortfall(
                                snapshot,
                                &ShortfallRequest {
                                    preparation_id: line.preparation_id,
                                    department,
                                    quantity: plan.remainder,
                                    cost_per_unit: basis.cost_per_unit,
                                    reason: format!(
                                        "Insufficient stock for {} on {:?}",
                                        info.name, depletion.operation_type
                                    ),
                                    source: depletion.shortfall_source,
                                    affected_recipe_ids: depletion.affected_recipe_ids.clone(),
                                },
                                info,
                                basis.source_batch_id,
                                now,
                            )
                            .await?;
                        allocations.push(BatchAllocation {
                            batch_id: negative.id,
                            batch_number: negative.batch_number.clone(),
                            quantity: plan.remainder,
                            cost_per_unit: negative.cost_per_unit,
                            batch_date: negative.production_date,
                        });
                    }
                }
            }

            let total_cost: Decimal = allocations.iter().map(|a| a.cost()).sum();
            items.push(OperationItem {
                id: Uuid::new_v4(),
                preparation_id: line.preparation_id,
                preparation_name: info.name.clone(),
                quantity: line.quantity,
                unit: info.base_unit.clone(),
                batch_allocations: allocations,
                batch_id: None,
                total_cost,
                average_cost_per_unit: total_cost / line.quantity,
                expiry_date: None,
                notes: line.notes.clone(),
            });
        }

        Ok(Operation {
            id: Uuid::new_v4(),
            operation_type: depletion.operation_type,
            document_number: self.document_number(depletion.operation_type).await?,
            operation_date: now,
            department,
            responsible_person: depletion.responsible_person,
            total_value: items.iter().map(|i| i.total_cost).sum(),
            items,
            status: OperationStatus::Confirmed,
            details: Some(depletion.details),
            related_inventory_id: depletion.related_inventory_id,
            notes: depletion.notes,
            created_at: now,
        })
    }

    // ========================================================================
    // Stock counts
    // ========================================================================

    /// Open a draft count seeded with the current balances
    pub async fn start_count(
        &self,
        department: Department,
        responsible_person: &str,
        notes: Option<String>,
    ) -> LedgerResult<InventoryDocument> {
        validate_responsible_person(responsible_person)
            .map_err(|m| LedgerError::validation("responsible_person", m))?;

        let balances = self.balances.recompute(Some(department)).await?;
        let prefix = format!("INV-{}", department.as_str().to_uppercase());
        let sequence = self.ledger.store().next_sequence(&prefix).await?;
        let now = Utc::now();

        let items = balances
            .into_iter()
            .map(|b| InventoryItem {
                id: Uuid::new_v4(),
                preparation_id: b.preparation_id,
                preparation_name: b.preparation_name,
                system_quantity: b.total_quantity,
                actual_quantity: b.total_quantity,
                difference: Decimal::ZERO,
                unit: b.unit,
                average_cost: b.average_cost,
                value_difference: Decimal::ZERO,
                notes: None,
                counted_by: None,
            })
            .collect();

        let mut document = InventoryDocument {
            id: Uuid::new_v4(),
            document_number: format_document_number(&prefix, sequence),
            inventory_date: now,
            department,
            responsible_person: responsible_person.to_string(),
            items,
            total_items: 0,
            total_discrepancies: 0,
            total_value_difference: Decimal::ZERO,
            status: InventoryStatus::Draft,
            notes,
            created_at: now,
            updated_at: now,
        };
        document.recompute_totals(self.config.inventory.discrepancy_tolerance);
        self.ledger.store().save_inventory(&document).await?;

        tracing::info!(
            document_number = %document.document_number,
            %department,
            items = document.total_items,
            "Stock count started"
        );
        Ok(document)
    }

    async fn draft_document(&self, document_id: Uuid) -> LedgerResult<InventoryDocument> {
        let document = self
            .ledger
            .store()
            .inventory(document_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("Inventory document {}", document_id)))?;
        if document.status != InventoryStatus::Draft {
            return Err(LedgerError::InvalidStateTransition(format!(
                "inventory document {} is {:?}, not draft",
                document.document_number, document.status
            )));
        }
        Ok(document)
    }

    /// Enter counted quantities. Batches are not touched until finalize.
    pub async fn record_counts(
        &self,
        document_id: Uuid,
        counts: Vec<CountEntry>,
    ) -> LedgerResult<InventoryDocument> {
        for (i, count) in counts.iter().enumerate() {
            validate_counted_quantity(count.actual_quantity)
                .map_err(|m| LedgerError::validation(format!("items[{}].actual_quantity", i), m))?;
        }

        let _guard = self.documents.lock().await;
        let mut document = self.draft_document(document_id).await?;

        for count in counts {
            let position = match document
                .items
                .iter()
                .position(|i| i.preparation_id == count.preparation_id)
            {
                Some(position) => position,
                None => {
                    let info = self.ledger.preparation_info(count.preparation_id).await?;
                    let average_cost = self.tracker.cost_basis_for(count.preparation_id).await?;
                    document.items.push(InventoryItem {
                        id: Uuid::new_v4(),
                        preparation_id: info.id,
                        preparation_name: info.name,
                        system_quantity: Decimal::ZERO,
                        actual_quantity: Decimal::ZERO,
                        difference: Decimal::ZERO,
                        unit: info.base_unit,
                        average_cost,
                        value_difference: Decimal::ZERO,
                        notes: None,
                        counted_by: None,
                    });
                    document.items.len() - 1
                }
            };

            let item = &mut document.items[position];
            item.record_actual(count.actual_quantity);
            if count.notes.is_some() {
                item.notes = count.notes;
            }
            if count.counted_by.is_some() {
                item.counted_by = count.counted_by;
            }
        }

        document.recompute_totals(self.config.inventory.discrepancy_tolerance);
        document.updated_at = Utc::now();
        self.ledger.store().save_inventory(&document).await?;
        Ok(document)
    }

    /// Turn discrepancies into a correction (shortages) and a receipt
    /// (surpluses) and confirm the document, all in one commit. A clean
    /// count produces no operations. If anything fails before the commit
    /// the document stays draft and stock is untouched.
    pub async fn finalize(&self, document_id: Uuid) -> LedgerResult<Vec<Operation>> {
        let _guard = self.documents.lock().await;
        let mut document = self.draft_document(document_id).await?;
        let department = document.department;
        let tolerance = self.config.inventory.discrepancy_tolerance;

        let mut shortages = Vec::new();
        let mut surpluses = Vec::new();
        for item in document.items.iter().filter(|i| i.is_discrepancy(tolerance)) {
            if item.difference < Decimal::ZERO {
                shortages.push(StockItem {
                    preparation_id: item.preparation_id,
                    quantity: item.difference.abs(),
                    notes: item.notes.clone(),
                });
            } else {
                let cost_per_unit = if item.average_cost > Decimal::ZERO {
                    item.average_cost
                } else {
                    self.tracker.cost_basis_for(item.preparation_id).await?
                };
                surpluses.push(ReceiptItem {
                    preparation_id: item.preparation_id,
                    quantity: item.difference,
                    cost_per_unit,
                    production_date: None,
                    expiry_date: None,
                    notes: item.notes.clone(),
                });
            }
        }

        let correction = (!shortages.is_empty()).then(|| Depletion {
            operation_type: OperationType::Correction,
            department,
            responsible_person: document.responsible_person.clone(),
            details: OperationDetails::Correction(CorrectionDetails {
                reason: CorrectionReason::Other,
                related_id: Some(document.id),
                related_name: Some(document.document_number.clone()),
            }),
            notes: Some(format!("Stock count {} shortage", document.document_number)),
            policy: ShortagePolicy::Reject,
            shortfall_source: ShortfallSource::Correction,
            affected_recipe_ids: Vec::new(),
            related_inventory_id: Some(document.id),
        });
        let receipt = (!surpluses.is_empty()).then(|| ReceiptRequest {
            department,
            responsible_person: document.responsible_person.clone(),
            items: surpluses,
            source_type: BatchSourceType::InventoryAdjustment,
            notes: Some(format!("Stock count {} surplus", document.document_number)),
        });

        let now = Utc::now();
        if let Some(depletion) = &correction {
            validate_depletion(depletion, &shortages)?;
        }
        if let Some(request) = &receipt {
            validate_receipt(request, now)?;
        }

        let counted = shortages
            .iter()
            .map(|s| s.preparation_id)
            .chain(receipt.iter().flat_map(|r| r.items.iter().map(|i| i.preparation_id)));
        let infos = self.resolve(counted).await?;
        let keys: BTreeSet<StockKey> = infos.keys().map(|id| (*id, department)).collect();
        let guards = self.ledger.locks().acquire_many(keys.iter().copied()).await;
        let mut snapshot = self.ledger.snapshot(&keys).await?;

        let mut operations = Vec::new();
        let mut batches = Vec::new();
        if let Some(depletion) = correction {
            let operation = self
                .plan_depletion(depletion, &shortages, &infos, &mut snapshot, now)
                .await?;
            operations.push(operation);
        }
        let mut recorded_receipt = None;
        if let Some(request) = &receipt {
            let (operation, new_batches) = self
                .build_receipt(request, &infos, Some(document.id), now)
                .await?;
            batches.extend(new_batches);
            recorded_receipt = Some(operation.clone());
            operations.push(operation);
        }
        batches.extend(snapshot.into_changed());

        document.status = InventoryStatus::Confirmed;
        document.updated_at = now;
        self.ledger
            .store()
            .commit(WriteSet {
                batches,
                operations: operations.clone(),
                inventories: vec![document.clone()],
            })
            .await?;
        drop(guards);

        tracing::info!(
            document_number = %document.document_number,
            discrepancies = document.total_discrepancies,
            operations = operations.len(),
            "Stock count finalized"
        );

        match &recorded_receipt {
            Some(receipt) => self.after_receipt(receipt).await,
            None => {
                if !operations.is_empty() {
                    self.refresh_balances(Some(department)).await;
                }
            }
        }
        Ok(operations)
    }

    /// Abandon a draft count
    pub async fn cancel_count(&self, document_id: Uuid) -> LedgerResult<InventoryDocument> {
        let _guard = self.documents.lock().await;
        let mut document = self.draft_document(document_id).await?;
        document.status = InventoryStatus::Cancelled;
        document.updated_at = Utc::now();
        self.ledger.store().save_inventory(&document).await?;

        tracing::info!(document_number = %document.document_number, "Stock count cancelled");
        Ok(document)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Recorded operations, newest first
    pub async fn operations(&self, department: Option<Department>) -> LedgerResult<Vec<Operation>> {
        let mut operations = self.ledger.store().operations(department).await?;
        operations.sort_by(|a, b| {
            b.operation_date
                .cmp(&a.operation_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(operations)
    }

    pub async fn operation(&self, id: Uuid) -> LedgerResult<Option<Operation>> {
        Ok(self.ledger.store().operation(id).await?)
    }

    /// Stock-count documents, newest first
    pub async fn inventories(
        &self,
        department: Option<Department>,
    ) -> LedgerResult<Vec<InventoryDocument>> {
        let mut documents = self.ledger.store().inventories(department).await?;
        documents.sort_by(|a, b| b.inventory_date.cmp(&a.inventory_date));
        Ok(documents)
    }

    pub async fn inventory(&self, id: Uuid) -> LedgerResult<Option<InventoryDocument>> {
        Ok(self.ledger.store().inventory(id).await?)
    }
}

fn validate_receipt(request: &ReceiptRequest, now: DateTime<Utc>) -> LedgerResult<()> {
    validate_responsible_person(&request.responsible_person)
        .map_err(|m| LedgerError::validation("responsible_person", m))?;
    validate_item_count(request.items.len()).map_err(|m| LedgerError::validation("items", m))?;
    for (i, item) in request.items.iter().enumerate() {
        validate_quantity(item.quantity)
            .map_err(|m| LedgerError::validation(format!("items[{}].quantity", i), m))?;
        validate_cost_per_unit(item.cost_per_unit)
            .map_err(|m| LedgerError::validation(format!("items[{}].cost_per_unit", i), m))?;
        validate_expiry(item.production_date.unwrap_or(now), item.expiry_date)
            .map_err(|m| LedgerError::validation(format!("items[{}].expiry_date", i), m))?;
    }
    Ok(())
}

fn validate_depletion(depletion: &Depletion, lines: &[StockItem]) -> LedgerResult<()> {
    validate_responsible_person(&depletion.responsible_person)
        .map_err(|m| LedgerError::validation("responsible_person", m))?;
    validate_item_count(lines.len()).map_err(|m| LedgerError::validation("items", m))?;
    for (i, line) in lines.iter().enumerate() {
        validate_quantity(line.quantity)
            .map_err(|m| LedgerError::validation(format!("items[{}].quantity", i), m))?;
    }
    Ok(())
}
