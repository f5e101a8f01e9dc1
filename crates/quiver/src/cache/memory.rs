//! In-memory cache store with size-based eviction.

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use tracing::{debug, warn};

use super::store::{CacheStore, StoreResult};
use super::CacheEntry;

const DEFAULT_MAX_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// [`CacheStore`] backed by an in-process moka cache, weighted by payload
/// size.
#[derive(Clone)]
pub struct MemoryStore {
    cache: MokaCache<String, CacheEntry>,
    max_size: u64,
}

impl MemoryStore {
    /// Create a store bounded to `max_size_bytes` of payload.
    pub fn new(max_size_bytes: u64) -> Self {
        assert!(
            max_size_bytes > 0,
            "memory store size must be greater than zero"
        );
        let cache = MokaCache::builder()
            .weigher(|_key: &String, entry: &CacheEntry| {
                entry.data.len().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_size_bytes)
            .build();
        debug!(max_size = max_size_bytes, "memory store created");
        Self {
            cache,
            max_size: max_size_bytes,
        }
    }

    /// Number of entries currently resident.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    #[cfg(test)]
    async fn settle(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE_BYTES)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn initialize(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>> {
        Ok(self.cache.get(key).await)
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> StoreResult<()> {
        let size = entry.data.len() as u64;
        if size > self.max_size {
            warn!(
                key,
                size,
                max_size = self.max_size,
                "entry too large for memory store, skipping"
            );
            return Ok(());
        }
        self.cache.insert(key.to_owned(), entry).await;
        Ok(())
    }

    async fn invalidate(&self, key: &str, full_expire: bool) -> StoreResult<()> {
        if let Some(mut entry) = self.cache.get(key).await {
            entry.soft_ttl = 0;
            if full_expire {
                entry.ttl = 0;
            }
            self.cache.insert(key.to_owned(), entry).await;
            debug!(key, full_expire, "entry invalidated");
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.cache.invalidate_all();
        debug!("memory store cleared");
        Ok(())
    }
}
