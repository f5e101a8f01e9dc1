//! Cache entry: payload plus the freshness metadata that drives
//! revalidation decisions.

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};

use crate::headers;

/// Data and metadata for one cached response.
///
/// Entries are immutable snapshots: a 304 revalidation produces a *new*
/// entry via [`CacheEntry::merge_not_modified`] and the store is refreshed
/// with `put`, so a mapping being read by one in-flight validation is never
/// mutated by another.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    /// Response payload.
    pub data: Bytes,
    /// ETag for cache coherency, when the origin sent one.
    pub etag: Option<String>,
    /// Server-reported send time, epoch ms (0 = absent).
    pub server_date: i64,
    /// Last modification time reported for the resource, epoch ms
    /// (0 = absent).
    pub last_modified: i64,
    /// Hard expiry, epoch ms: past this the entry must not be served
    /// without successful revalidation.
    pub ttl: i64,
    /// Soft expiry, epoch ms: past this the entry should be revalidated in
    /// the background but may still be served immediately.
    pub soft_ttl: i64,
    /// Response headers as received. Replaced wholesale by 304 merges,
    /// never edited in place.
    pub response_headers: HeaderMap,
}

impl CacheEntry {
    /// True once the hard expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.ttl < now_ms
    }

    /// True once the soft expiry has passed and the entry should be
    /// refreshed from the origin.
    pub fn refresh_needed(&self) -> bool {
        self.refresh_needed_at(Utc::now().timestamp_millis())
    }

    pub fn refresh_needed_at(&self, now_ms: i64) -> bool {
        self.soft_ttl < now_ms
    }

    /// Build the merged entry for a 304 revalidation: same payload, header
    /// mapping rebuilt from this entry's headers plus the 304's headers
    /// (new values win). A 304 is permitted to omit headers already known
    /// from the original 200, so the old mapping is the base.
    #[must_use]
    pub fn merge_not_modified(&self, fresh_headers: &HeaderMap) -> CacheEntry {
        let mut merged = self.clone();
        merged.response_headers = headers::merge_headers(&self.response_headers, fresh_headers);
        merged
    }

    /// Conditional headers for revalidating this entry: `If-None-Match`
    /// from the ETag and `If-Modified-Since` from the last-modified stamp,
    /// each only when known.
    pub fn conditional_headers(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(etag) = &self.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                map.insert(IF_NONE_MATCH, value);
            }
        }
        if self.last_modified > 0 {
            let formatted = headers::format_http_date(self.last_modified);
            if let Ok(value) = HeaderValue::from_str(&formatted) {
                map.insert(IF_MODIFIED_SINCE, value);
            }
        }
        map
    }
}
