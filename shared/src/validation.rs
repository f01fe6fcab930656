//! Validation utilities for ledger inputs
//!
//! Each validator returns a short static message that the ledger wraps
//! into its own error type together with the offending field.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

// ============================================================================
// Quantity and Cost Validations
// ============================================================================

/// Validate that a quantity entering or leaving stock is positive
pub fn validate_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity <= Decimal::ZERO {
        return Err("Quantity must be positive");
    }
    Ok(())
}

/// Validate a counted quantity (zero is a valid count)
pub fn validate_counted_quantity(quantity: Decimal) -> Result<(), &'static str> {
    if quantity < Decimal::ZERO {
        return Err("Counted quantity cannot be negative");
    }
    Ok(())
}

/// Validate a unit cost (free preparations are allowed)
pub fn validate_cost_per_unit(cost: Decimal) -> Result<(), &'static str> {
    if cost < Decimal::ZERO {
        return Err("Cost per unit cannot be negative");
    }
    Ok(())
}

/// Validate that an expiry date does not precede production
pub fn validate_expiry(
    production_date: DateTime<Utc>,
    expiry_date: Option<DateTime<Utc>>,
) -> Result<(), &'static str> {
    match expiry_date {
        Some(expiry) if expiry < production_date => {
            Err("Expiry date cannot be before production date")
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Document Validations
// ============================================================================

/// Validate the person signing a document
pub fn validate_responsible_person(name: &str) -> Result<(), &'static str> {
    if name.trim().is_empty() {
        return Err("Responsible person is required");
    }
    if name.len() > 100 {
        return Err("Responsible person must be at most 100 characters");
    }
    Ok(())
}

/// Validate that a document carries at least one line
pub fn validate_item_count(count: usize) -> Result<(), &'static str> {
    if count == 0 {
        return Err("At least one item is required");
    }
    Ok(())
}
