//! File-backed credential storage.
//!
//! The session is kept as a small JSON document, by default at
//! `~/.local/share/depot/session.json` on Linux,
//! `~/Library/Application Support/com.depot-wms.depot/session.json` on macOS,
//! and `%APPDATA%\depot-wms\depot\data\session.json` on Windows.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{Credential, CredentialStore, StoreError};

/// On-disk format of the session file.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    /// Version of the file format (for future migrations).
    version: u32,

    credential: Credential,
}

/// Credential store persisted to a JSON file.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash never leaves a half-written session behind. On Unix
/// the file is only readable by its owner.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Create a store backed by the given path.
    ///
    /// The file and its parent directories are created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Platform-specific default location of the session file.
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let dirs = directories::ProjectDirs::from("com", "depot-wms", "depot")
            .ok_or(StoreError::DataDirUnavailable)?;
        Ok(dirs.data_dir().join("session.json"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_atomic(&self, contents: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = open_private(&tmp_path).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

async fn open_private(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self) -> Result<Option<Credential>, StoreError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let session: SessionFile = serde_json::from_str(&contents)?;
        Ok(Some(session.credential))
    }

    async fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let session = SessionFile {
            version: 1,
            credential: credential.clone(),
        };
        let contents = serde_json::to_vec_pretty(&session)?;
        self.write_atomic(&contents).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
