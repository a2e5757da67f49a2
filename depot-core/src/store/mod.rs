//! Credential storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for token values that prevents accidental logging
//! - [`Credential`] - The access/refresh token pair of an authenticated session
//! - [`CredentialStore`] - Trait for credential storage backends
//! - [`MemoryCredentialStore`] - In-memory implementation for tests and embedders
//! - [`FileCredentialStore`] - JSON file in the platform data directory
//! - [`KeyringCredentialStore`] - OS keyring implementation (with `keyring-store` feature)
//! - [`create_store`] - Helper to select a backend by [`StoreKind`]
//!
//! # Example
//!
//! ```rust,ignore
//! use depot_core::store::{Credential, CredentialStore, MemoryCredentialStore};
//!
//! let store = MemoryCredentialStore::new();
//! store.set(&Credential::new("access", "refresh")).await?;
//!
//! let current = store.get().await?.unwrap();
//! assert_eq!(current.access_token.expose(), "access");
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod file;
#[cfg(feature = "keyring-store")]
mod keyring;
mod memory;

pub use file::FileCredentialStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringCredentialStore;
pub use memory::MemoryCredentialStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing memory is wiped when the secret is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// The access/refresh token pair identifying an authenticated session.
///
/// Created on login, replaced on every successful refresh, and destroyed on
/// logout or terminal authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Short-lived bearer token attached to outbound calls.
    pub access_token: Secret,

    /// Long-lived token exchanged at the refresh endpoint.
    pub refresh_token: Secret,

    /// When this pair was obtained.
    pub issued_at: DateTime<Utc>,
}

/// Token pair as returned by the login and refresh endpoints.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TokenPairBody {
    Wrapped { data: TokenPair },
    Bare(TokenPair),
}

impl Credential {
    /// Create a credential issued now.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            issued_at: Utc::now(),
        }
    }

    /// Extract a credential from a login or refresh response body.
    ///
    /// Accepts both `{"data": {"accessToken", "refreshToken"}}` and the bare
    /// pair. When the server omits a new refresh token, `previous_refresh` is
    /// kept. Returns `None` if no usable pair can be found.
    pub fn from_response_body(
        body: &serde_json::Value,
        previous_refresh: Option<&Secret>,
    ) -> Option<Self> {
        let pair = match serde_json::from_value::<TokenPairBody>(body.clone()).ok()? {
            TokenPairBody::Wrapped { data } => data,
            TokenPairBody::Bare(pair) => pair,
        };

        if pair.access_token.is_empty() {
            return None;
        }

        let refresh_token = match pair.refresh_token {
            Some(token) if !token.is_empty() => Secret::new(token),
            _ => previous_refresh?.clone(),
        };

        Some(Self {
            access_token: Secret::new(pair.access_token),
            refresh_token,
            issued_at: Utc::now(),
        })
    }
}

/// Error type for credential store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// I/O error reading or writing a credential file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },

    /// Platform data directory could not be determined.
    #[error("data directory not available")]
    DataDirUnavailable,
}

/// Abstraction over credential storage backends.
///
/// The store holds at most one [`Credential`]. It is owned by the
/// dispatcher and mutated only by login, refresh, logout, and terminal
/// failure handling.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve the current credential.
    ///
    /// Returns `Ok(None)` if no session is stored.
    async fn get(&self) -> Result<Option<Credential>, StoreError>;

    /// Replace the current credential.
    async fn set(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Remove the current credential.
    ///
    /// Returns `Ok(())` even if nothing was stored.
    async fn clear(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn get(&self) -> Result<Option<Credential>, StoreError> {
        (**self).get().await
    }

    async fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        (**self).set(credential).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        (**self).clear().await
    }
}

/// Backend selection for [`create_store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Process-local storage; nothing survives a restart.
    Memory,
    /// JSON file at the given path.
    File(PathBuf),
    /// OS keyring entry under the given service name.
    Keyring(String),
}

/// Create a credential store for the requested backend.
///
/// A keyring request falls back to [`MemoryCredentialStore`] with a warning
/// when the keyring is unavailable or the `keyring-store` feature is off.
pub fn create_store(kind: StoreKind) -> Arc<dyn CredentialStore> {
    match kind {
        StoreKind::Memory => {
            tracing::debug!("Using in-memory credential storage");
            Arc::new(MemoryCredentialStore::new())
        }
        StoreKind::File(path) => {
            tracing::debug!("Using credential file at {:?}", path);
            Arc::new(FileCredentialStore::new(path))
        }
        StoreKind::Keyring(service) => keyring_or_memory(&service),
    }
}

#[cfg(feature = "keyring-store")]
fn keyring_or_memory(service: &str) -> Arc<dyn CredentialStore> {
    match KeyringCredentialStore::try_new(service) {
        Ok(store) => {
            tracing::info!("Using OS keyring for credential storage");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                "Keyring unavailable ({}), falling back to memory store. \
                 The session will not persist across restarts.",
                e
            );
            Arc::new(MemoryCredentialStore::new())
        }
    }
}

#[cfg(not(feature = "keyring-store"))]
fn keyring_or_memory(_service: &str) -> Arc<dyn CredentialStore> {
    tracing::warn!(
        "Keyring storage requested but keyring-store feature not enabled. \
         Using memory store. The session will not persist across restarts."
    );
    Arc::new(MemoryCredentialStore::new())
}
