//! Shared types and models for the preparation ledger
//!
//! This crate contains the plain domain records (batches, operations,
//! balances, inventory documents) and the pure validation helpers used by
//! the ledger services.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
