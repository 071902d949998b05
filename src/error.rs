//! Error types for the bCore driver

use crate::domain::models::ConnectionStatus;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`BcoreManager`](crate::BcoreManager)
///
/// Bad channel indices and characteristics missing from the connected
/// hardware are not errors: those operations become no-ops.
#[derive(Error, Debug)]
pub enum BcoreError {
    #[error("bCore session not ready (status: {0})")]
    NotReady(ConnectionStatus),

    #[error("Cannot initialize while {0}")]
    InvalidState(ConnectionStatus),

    #[error("bCore device unavailable")]
    DeviceUnavailable,

    #[error("Failed to discover bCore services: {0}")]
    DiscoveryFailed(String),

    #[error("Link to bCore lost")]
    LinkLost,

    #[error("bCore did not respond within {0:?}")]
    PeripheralUnresponsive(Duration),

    #[error("GATT request failed: {0:#}")]
    Gatt(anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BcoreError>;
