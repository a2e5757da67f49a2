//! In-memory credential storage implementation.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Credential, CredentialStore, StoreError};

/// In-memory credential store for testing and embedding.
///
/// This store is not persistent; the session is lost when the process exits.
pub struct MemoryCredentialStore {
    current: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Create a memory store that already holds a session.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            current: RwLock::new(Some(credential)),
        }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("has_credential", &self.current.read().is_some())
            .finish()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self) -> Result<Option<Credential>, StoreError> {
        Ok(self.current.read().clone())
    }

    async fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        *self.current.write() = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.current.write().take();
        Ok(())
    }
}
