//! Raw key-value persistence primitive.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreResult;

/// String key to string value persistence.
///
/// The token store serializes all access to a backend through its own lock,
/// so implementations do not need to coordinate concurrent writers.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Returns `None` when the key is not present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value. `None` removes the key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn put(&self, key: &str, value: Option<String>) -> StoreResult<()>;

    /// Remove a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.put(key, None).await
    }
}

/// Volatile backend for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Option<String>) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        match value {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_remove() {
        let kv = InMemoryKeyValueStore::new();
        assert_eq!(kv.get("a").await.unwrap(), None);

        kv.put("a", Some("1".into())).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));

        kv.put("a", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);

        kv.put("b", Some("2".into())).await.unwrap();
        kv.remove("b").await.unwrap();
        assert!(kv.is_empty().await);
    }
}
