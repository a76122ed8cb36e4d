//! In-memory session storage

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::Storage;
use crate::error::Result;

/// Process-local [`Storage`] backed by a `HashMap`.
///
/// Contents are lost when the value is dropped, which is what tests and
/// single-shot CLI runs want.
///
/// # Examples
///
/// ```
/// use smart_launch::env::{MemoryStorage, Storage};
///
/// # tokio_test::block_on(async {
/// let storage = MemoryStorage::new();
/// storage.set("k", serde_json::json!("v")).await.unwrap();
/// assert_eq!(storage.get("k").await.unwrap(), Some(serde_json::json!("v")));
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn unset(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
