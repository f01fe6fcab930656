//! Tracing setup for applications embedding the ledger

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Returns false when a subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prep_ledger=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Same as [`init_tracing`] but emitting one JSON object per event
pub fn init_json_tracing() -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prep_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .is_ok()
}
