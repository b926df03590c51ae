//! Storage backend trait and the [`HttpCache`] façade.

mod http_cache;
mod memory;

use async_trait::async_trait;

use crate::entry::CacheEntry;
use crate::error::StorageResult;

pub use http_cache::{HttpCache, Variant};
pub use memory::InMemoryStorage;

/// Physical cache storage.
///
/// Implementations must be safe for concurrent reads and provide atomic
/// per-key writes; ordering between concurrent writers on the same key is
/// backend-defined. The cache never persists a format of its own; entries
/// are handed to the backend whole.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Reads the entry stored under `key`.
    async fn read(&self, key: &str) -> StorageResult<Option<CacheEntry>>;

    /// Stores `entry` under `key`, replacing any previous value.
    async fn write(&self, key: &str, entry: CacheEntry) -> StorageResult<()>;

    /// Removes the entry stored under `key`, if any.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Backend name for diagnostics.
    fn name(&self) -> &str {
        "storage"
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn read(&self, key: &str) -> StorageResult<Option<CacheEntry>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &str, entry: CacheEntry) -> StorageResult<()> {
        (**self).write(key, entry).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
