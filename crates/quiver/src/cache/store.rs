//! # Cache store boundary
//!
//! The engine produces and merges entries; an external store owns
//! persistence and eviction policy. This trait is that boundary contract.

use async_trait::async_trait;

use super::CacheEntry;

/// Result of a store operation.
pub type StoreResult<T> = std::result::Result<T, std::io::Error>;

/// A cache keyed by the request's cache key, holding entry snapshots.
///
/// Implementations hand out entries as immutable snapshots and accept
/// refreshed snapshots through [`CacheStore::put`]; nothing mutates a
/// handed-out entry in place.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// One-time setup, run by the dispatcher before any request is served
    /// from a worker context.
    async fn initialize(&self) -> StoreResult<()>;

    /// Retrieve the entry for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> StoreResult<Option<CacheEntry>>;

    /// Add or replace the entry for `key`.
    async fn put(&self, key: &str, entry: CacheEntry) -> StoreResult<()>;

    /// Expire the entry for `key` in place: soft expiry always, hard
    /// expiry too when `full_expire`. The payload is retained so
    /// conditional revalidation stays possible.
    async fn invalidate(&self, key: &str, full_expire: bool) -> StoreResult<()>;

    /// Drop the entry for `key` outright.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// Empty the store.
    async fn clear(&self) -> StoreResult<()>;
}
