//! Durable key-value storage for the cache and ledger projections.
//!
//! Stores only ever see the durable projection of a subsystem, serialized as
//! JSON; transient flags never reach this layer.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use directories::ProjectDirs;
use serde_json::Error as SerdeError;
use tokio::fs;
use tokio::sync::Mutex;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "HsCodeAnalyzer";
const APP_NAME: &str = "HsCodeAnalyzer";

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

/// Opaque durable key-value store the cache and ledger persist through.
///
/// Values are JSON strings; the store does not interpret them.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError>;
    async fn set(&self, key: &str, value: String) -> Result<(), PersistError>;
    async fn delete(&self, key: &str) -> Result<(), PersistError>;
}

/// File-backed store: one JSON file per key under the app config directory.
pub struct JsonFileStore {
    base: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at the platform config directory.
    pub fn new() -> Result<Self, PersistError> {
        let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
            .ok_or(PersistError::StorageUnavailable)?;
        Ok(Self {
            base: dirs.config_dir().to_path_buf(),
        })
    }

    /// Store rooted at an explicit directory (tests, portable installs).
    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// In-memory store for tests and embedding without a filesystem.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PersistError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
