//! Top-level error types for depot.

use thiserror::Error;

use crate::config::ConfigError;
use crate::refresh::RefreshError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Top-level error type for setting up and managing a client.
///
/// Dispatched calls never return this; their failures are reported as
/// [`Envelope`](crate::Envelope)s.
#[derive(Debug, Error)]
pub enum DepotError {
    /// Error from credential storage.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error building or using the HTTP transport.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Error from a refresh cycle.
    #[error("refresh error: {0}")]
    Refresh(#[from] RefreshError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
