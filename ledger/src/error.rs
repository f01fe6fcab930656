//! Error handling for the preparation ledger
//!
//! Validation failures are returned to the caller before any state changes.
//! Store failures are wrapped so callers can tell them apart from business
//! rule violations.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Ledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    // Validation errors
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Unknown preparation: {0}")]
    UnknownPreparation(Uuid),

    #[error(
        "Insufficient stock for {preparation_name} ({preparation_id}): requested {requested}, available {available}, missing {missing}"
    )]
    InsufficientStock {
        preparation_id: Uuid,
        preparation_name: String,
        requested: Decimal,
        available: Decimal,
        missing: Decimal,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Persistence errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the persistence collaborators
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error")]
    Backend(#[from] anyhow::Error),
}

/// Serializable error summary for callers that report errors outward
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl LedgerError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation { .. } => "VALIDATION_ERROR",
            LedgerError::UnknownPreparation(_) => "UNKNOWN_PREPARATION",
            LedgerError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::Configuration(_) => "CONFIGURATION_ERROR",
            LedgerError::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the caller can fix the request and retry
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation { .. }
                | LedgerError::UnknownPreparation(_)
                | LedgerError::InsufficientStock { .. }
        )
    }

    pub fn detail(&self) -> ErrorDetail {
        let field = match self {
            LedgerError::Validation { field, .. } => Some(field.clone()),
            LedgerError::InsufficientStock { .. } => Some("quantity".to_string()),
            _ => None,
        };
        ErrorDetail {
            code: self.code().to_string(),
            message: self.to_string(),
            field,
        }
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        LedgerError::Configuration(err.to_string())
    }
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for store collaborators
pub type StoreResult<T> = Result<T, StoreError>;
