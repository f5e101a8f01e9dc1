//! # Freshness parsing
//!
//! Derives a cache entry's validity window from the competing HTTP
//! freshness headers carried by a response. `Cache-Control` governs
//! whenever present, even when `Expires` would be more restrictive;
//! `no-cache`/`no-store` short-circuit everything.

use chrono::Utc;

use super::CacheEntry;
use crate::headers;
use crate::response::NetworkResponse;

/// Extract a cache entry from a response, or `None` when the origin
/// forbids caching.
pub fn parse_cache_headers(response: &NetworkResponse) -> Option<CacheEntry> {
    parse_cache_headers_at(Utc::now().timestamp_millis(), response)
}

/// Freshness computation against an explicit clock, for deterministic
/// callers.
pub fn parse_cache_headers_at(now_ms: i64, response: &NetworkResponse) -> Option<CacheEntry> {
    let headers = &response.headers;

    let mut server_date: i64 = 0;
    let mut last_modified: i64 = 0;
    let mut server_expires: i64 = 0;
    let mut soft_expire: i64 = 0;
    let mut final_expire: i64 = 0;
    let mut max_age: i64 = 0;
    let mut stale_while_revalidate: i64 = 0;
    let mut has_cache_control = false;
    let mut must_revalidate = false;

    if let Some(value) = headers::header_str(headers, "date") {
        server_date = headers::parse_date_as_epoch(value);
    }

    if let Some(value) = headers::header_str(headers, "cache-control") {
        has_cache_control = true;
        for token in value.split(',') {
            let token = token.trim();
            if token == "no-cache" || token == "no-store" {
                return None;
            } else if let Some(raw) = token.strip_prefix("max-age=") {
                // Unparseable durations are ignored, not fatal.
                max_age = raw.parse().unwrap_or(0);
            } else if let Some(raw) = token.strip_prefix("stale-while-revalidate=") {
                stale_while_revalidate = raw.parse().unwrap_or(0);
            } else if token == "must-revalidate" || token == "proxy-revalidate" {
                must_revalidate = true;
            }
        }
    }

    if let Some(value) = headers::header_str(headers, "expires") {
        server_expires = headers::parse_date_as_epoch(value);
    }

    if let Some(value) = headers::header_str(headers, "last-modified") {
        last_modified = headers::parse_date_as_epoch(value);
    }

    let etag = headers::header_str(headers, "etag").map(str::to_owned);

    if has_cache_control {
        soft_expire = now_ms + max_age * 1000;
        final_expire = if must_revalidate {
            soft_expire
        } else {
            soft_expire + stale_while_revalidate * 1000
        };
    } else if server_date > 0 && server_expires >= server_date {
        // An Expires header alone defines a single window with no
        // stale-serving allowance.
        soft_expire = now_ms + (server_expires - server_date);
        final_expire = soft_expire;
    }

    // With neither branch both expiries stay 0: the entry is immediately
    // stale but still usable for ETag/Last-Modified revalidation.
    Some(CacheEntry {
        data: response.data.clone(),
        etag,
        server_date,
        last_modified,
        ttl: final_expire,
        soft_ttl: soft_expire,
        response_headers: headers.clone(),
    })
}
