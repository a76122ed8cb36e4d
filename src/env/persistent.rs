//! Durable session storage on an embedded `sled` database
//!
//! Values are stored as JSON bytes and every write is flushed before it
//! returns, so a redirect issued right after `set` never outruns the disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use serde_json::Value;
use sled::Db;

use super::Storage;
use crate::error::{Result, SmartError};

/// [`Storage`] backed by a `sled` tree on disk.
pub struct PersistentStorage {
    db: Db,
}

impl PersistentStorage {
    /// Opens (or creates) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SmartError::Storage`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use smart_launch::env::PersistentStorage;
    ///
    /// # fn main() -> smart_launch::error::Result<()> {
    /// let storage = PersistentStorage::open("/tmp/smart-sessions")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| SmartError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Opens the store in the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::open(Self::default_path()?)
    }

    /// Platform data directory used by [`open_default`](Self::open_default).
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "smarthealthit", "smart-launch").ok_or_else(|| {
            SmartError::Storage("Could not determine data directory".to_string())
        })?;
        Ok(dirs.data_dir().join("sessions"))
    }
}

#[async_trait]
impl Storage for PersistentStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| SmartError::Storage(format!("Get failed: {}", e)))?
        {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| SmartError::Storage(format!("Deserialization failed: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| SmartError::Storage(format!("Serialization failed: {}", e)))?;

        self.db
            .insert(key.as_bytes(), bytes)
            .map_err(|e| SmartError::Storage(format!("Insert failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| SmartError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    async fn unset(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| SmartError::Storage(format!("Remove failed: {}", e)))?;

        self.db
            .flush()
            .map_err(|e| SmartError::Storage(format!("Flush failed: {}", e)))?;

        Ok(())
    }
}
