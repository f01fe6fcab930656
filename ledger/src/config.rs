//! Configuration management for the preparation ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with PREP_LEDGER_ prefix

use config::{Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::LedgerResult;

/// Main ledger configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerConfig {
    /// Current environment (development, production)
    pub environment: String,

    /// Balance aggregation thresholds
    pub balance: BalanceConfig,

    /// Stock-count settings
    pub inventory: InventoryConfig,

    /// Negative-batch reconciliation settings
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BalanceConfig {
    /// Days before expiry at which a balance is flagged as near expiry
    pub expiry_warning_days: i64,

    /// Quantity under which a balance is flagged as low stock
    pub min_stock_threshold: Decimal,

    /// Relative band for the cost trend (0.05 means ±5%)
    pub cost_trend_band: Decimal,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct InventoryConfig {
    /// Absolute difference below which a count matches the system quantity
    pub discrepancy_tolerance: Decimal,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReconciliationConfig {
    /// Limit each reconciliation pass to the quantity just received
    pub cap_to_receipt: bool,
}

impl LedgerConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> LedgerResult<Self> {
        dotenvy::dotenv().ok();
        let environment =
            std::env::var("PREP_LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("balance.expiry_warning_days", 1)?
            .set_default("balance.min_stock_threshold", "200")?
            .set_default("balance.cost_trend_band", "0.05")?
            .set_default("inventory.discrepancy_tolerance", "0.01")?
            .set_default("reconciliation.cap_to_receipt", false)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (PREP_LEDGER prefix)
            .add_source(
                Environment::with_prefix("PREP_LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            balance: BalanceConfig::default(),
            inventory: InventoryConfig::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: 1,
            min_stock_threshold: Decimal::from(200),
            cost_trend_band: Decimal::new(5, 2),
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            discrepancy_tolerance: Decimal::new(1, 2),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            cap_to_receipt: false,
        }
    }
}
