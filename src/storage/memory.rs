//! Heap-backed storage.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entry::CacheEntry;
use crate::error::StorageResult;
use crate::storage::Storage;

/// In-process storage over a concurrent map.
///
/// Writes on one key are atomic; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, parents and variants included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn write(&self, key: &str, entry: CacheEntry) -> StorageResult<()> {
        self.entries.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
