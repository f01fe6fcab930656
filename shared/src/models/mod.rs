//! Domain models for the preparation ledger

mod balance;
mod batch;
mod inventory;
mod operation;
mod preparation;
mod reconciliation;

pub use balance::*;
pub use batch::*;
pub use inventory::*;
pub use operation::*;
pub use preparation::*;
pub use reconciliation::*;
