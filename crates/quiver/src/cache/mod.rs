//! # Caching
//!
//! Entry data and the pure freshness computation that derives a validity
//! window from competing HTTP headers, plus the store boundary an external
//! dispatcher plugs persistence into.

pub mod entry;
pub mod freshness;
pub mod memory;
pub mod store;

pub use entry::CacheEntry;
pub use freshness::{parse_cache_headers, parse_cache_headers_at};
pub use memory::MemoryStore;
pub use store::{CacheStore, StoreResult};
