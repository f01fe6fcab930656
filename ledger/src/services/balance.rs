//! Balance aggregation
//!
//! Balances are a cache derived from the live batch set. They are rebuilt
//! per department on every refresh and never patched in place.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use prep_shared::{Balance, Batch, CostTrend, Department, PreparationInfo};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::BalanceConfig;
use crate::error::LedgerResult;
use crate::store::{BatchFilter, Catalogue, LedgerStore};

/// Derives and caches per-(preparation, department) balances
#[derive(Clone)]
pub struct BalanceAggregator {
    store: Arc<dyn LedgerStore>,
    catalogue: Arc<dyn Catalogue>,
    config: BalanceConfig,
    refresh: Arc<Mutex<()>>,
}

/// Compute the balances of one department from its batches.
///
/// Only active batches count, negative ones included. Preparations
/// without active batches get no balance at all.
pub fn compute_balances(
    department: Department,
    batches: &[Batch],
    catalogue: &HashMap<Uuid, PreparationInfo>,
    config: &BalanceConfig,
    now: DateTime<Utc>,
) -> Vec<Balance> {
    let mut groups: BTreeMap<Uuid, Vec<&Batch>> = BTreeMap::new();
    for batch in batches
        .iter()
        .filter(|b| b.is_active && b.department == department)
    {
        groups.entry(batch.preparation_id).or_default().push(batch);
    }

    let warning = Duration::days(config.expiry_warning_days);

    groups
        .into_iter()
        .map(|(preparation_id, mut group)| {
            group.sort_by(|a, b| {
                a.production_date
                    .cmp(&b.production_date)
                    .then(a.created_at.cmp(&b.created_at))
            });

            let total_quantity: Decimal = group.iter().map(|b| b.current_quantity).sum();
            let total_value: Decimal = group.iter().map(|b| b.total_value).sum();
            let average_cost = if total_quantity.is_zero() {
                Decimal::ZERO
            } else {
                total_value / total_quantity
            };

            let oldest = group[0];
            let newest = group[group.len() - 1];
            let cost_trend = if group.len() > 1 {
                CostTrend::classify(oldest.cost_per_unit, newest.cost_per_unit, config.cost_trend_band)
            } else {
                CostTrend::Stable
            };

            let has_expired = group.iter().any(|b| b.is_expired_at(now));
            let has_near_expiry = group.iter().any(|b| {
                b.expiry_date.map_or(false, |expiry| {
                    let left = expiry - now;
                    left > Duration::zero() && left <= warning
                })
            });

            let (preparation_name, unit) = match catalogue.get(&preparation_id) {
                Some(info) => (info.name.clone(), info.base_unit.clone()),
                None => (preparation_id.to_string(), oldest.unit.clone()),
            };

            Balance {
                preparation_id,
                preparation_name,
                department,
                total_quantity,
                unit,
                total_value,
                average_cost,
                latest_cost: newest.cost_per_unit,
                cost_trend,
                batch_ids: group.iter().map(|b| b.id).collect(),
                oldest_batch_date: oldest.production_date,
                newest_batch_date: newest.production_date,
                has_expired,
                has_near_expiry,
                below_min_stock: total_quantity < config.min_stock_threshold,
                last_calculated: now,
            }
        })
        .collect()
}

impl BalanceAggregator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        catalogue: Arc<dyn Catalogue>,
        config: BalanceConfig,
    ) -> Self {
        Self {
            store,
            catalogue,
            config,
            refresh: Arc::new(Mutex::new(())),
        }
    }

    /// Rebuild the balances of one department, or of all when `None`
    pub async fn recompute(&self, department: Option<Department>) -> LedgerResult<Vec<Balance>> {
        // Read and replace under one guard so a slower refresh never
        // overwrites a newer one
        let _guard = self.refresh.lock().await;

        let departments: Vec<Department> = match department {
            Some(d) => vec![d],
            None => Department::ALL.to_vec(),
        };

        let mut all = Vec::new();
        for department in departments {
            let filter = BatchFilter {
                department: Some(department),
                active_only: true,
                ..BatchFilter::default()
            };
            let batches = self.store.batches(&filter).await?;

            let mut catalogue = HashMap::new();
            for batch in &batches {
                if catalogue.contains_key(&batch.preparation_id) {
                    continue;
                }
                if let Some(info) = self.catalogue.preparation(batch.preparation_id).await? {
                    catalogue.insert(info.id, info);
                }
            }

            let balances = compute_balances(department, &batches, &catalogue, &self.config, Utc::now());
            tracing::debug!(%department, balances = balances.len(), "Balances recomputed");
            self.store.replace_balances(department, balances.clone()).await?;
            all.extend(balances);
        }
        Ok(all)
    }

    /// Cached balances as of the last recompute
    pub async fn balances(&self, department: Option<Department>) -> LedgerResult<Vec<Balance>> {
        Ok(self.store.balances(department).await?)
    }

    pub async fn balance(
        &self,
        preparation_id: Uuid,
        department: Department,
    ) -> LedgerResult<Option<Balance>> {
        Ok(self
            .store
            .balances(Some(department))
            .await?
            .into_iter()
            .find(|b| b.preparation_id == preparation_id))
    }

    /// Balances under the minimum stock threshold
    pub async fn low_stock_items(&self) -> LedgerResult<Vec<Balance>> {
        Ok(self
            .balances(None)
            .await?
            .into_iter()
            .filter(|b| b.below_min_stock)
            .collect())
    }

    /// Balances holding expired or nearly expired batches
    pub async fn expiring_items(&self) -> LedgerResult<Vec<Balance>> {
        Ok(self
            .balances(None)
            .await?
            .into_iter()
            .filter(|b| b.has_near_expiry || b.has_expired)
            .collect())
    }
}
