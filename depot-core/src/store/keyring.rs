//! OS keyring-backed credential storage implementation.

use async_trait::async_trait;
use keyring::Entry;

use super::{Credential, CredentialStore, StoreError};

const ENTRY_USER: &str = "session";

/// OS keyring-backed credential store.
///
/// This store uses the platform's native keyring service:
/// - macOS: Keychain
/// - Linux: Secret Service API (via libsecret)
/// - Windows: Credential Manager
///
/// The whole [`Credential`] is kept as one JSON-encoded entry with service
/// name `service_name` and user `session`.
pub struct KeyringCredentialStore {
    service_name: String,
}

impl KeyringCredentialStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        match Entry::new(service_name, ENTRY_USER) {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: format!("keyring backend not available: {}", e),
            }),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, ENTRY_USER).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringCredentialStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn get(&self) -> Result<Option<Credential>, StoreError> {
        let entry = self.entry()?;

        match entry.get_password() {
            Ok(encoded) => Ok(Some(serde_json::from_str(&encoded)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::PlatformFailure(e)) => Err(StoreError::BackendError {
                message: format!("platform keyring failure: {}", e),
            }),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring error: {}", e),
            }),
        }
    }

    async fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(credential)?;

        self.entry()?
            .set_password(&encoded)
            .map_err(|e| StoreError::BackendError {
                message: format!("failed to set keyring password: {}", e),
            })
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("failed to delete keyring entry: {}", e),
            }),
        }
    }
}
