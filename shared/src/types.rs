//! Common types used across the ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Department owning a stock of preparations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Department {
    Kitchen,
    Bar,
}

impl Department {
    pub const ALL: [Department; 2] = [Department::Kitchen, Department::Bar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Kitchen => "kitchen",
            Department::Bar => "bar",
        }
    }
}

impl std::fmt::Display for Department {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name a known enum variant
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl std::str::FromStr for Department {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kitchen" => Ok(Department::Kitchen),
            "bar" => Ok(Department::Bar),
            other => Err(ParseEnumError {
                kind: "department",
                value: other.to_string(),
            }),
        }
    }
}

/// What to do when a depleting operation asks for more than is on hand
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShortagePolicy {
    /// Fail the whole operation; nothing is mutated
    #[default]
    Reject,
    /// Deplete what exists and record the remainder as a negative batch
    RecordNegative,
}

/// Timestamp range for report queries, both ends inclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Format a journal document number, e.g. `PREP-REC-007`
pub fn format_document_number(prefix: &str, sequence: u64) -> String {
    format!("PREP-{}-{:03}", prefix, sequence)
}
