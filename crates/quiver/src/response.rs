//! Response types: the raw terminal outcome produced by the execution
//! engine, and the decoded envelope handed back to the dispatcher.

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::cache::CacheEntry;
use crate::error::EngineError;

/// Raw terminal response for one request: status, payload bytes, and
/// response headers, before any payload decoding.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: StatusCode,
    /// Payload bytes. Zero-length is a valid payload (no-content
    /// responses), distinct from a body that could not be read at all.
    pub data: Bytes,
    pub headers: HeaderMap,
    /// True when this carries a cached payload revalidated by a 304.
    pub not_modified: bool,
    /// Wall time spent executing the request, across all attempts.
    pub network_time: Duration,
}

impl NetworkResponse {
    pub fn new(
        status: StatusCode,
        data: Bytes,
        headers: HeaderMap,
        not_modified: bool,
        network_time: Duration,
    ) -> Self {
        Self {
            status,
            data,
            headers,
            not_modified,
            network_time,
        }
    }
}

/// Decoded envelope delivered to the caller: exactly one of a typed result
/// (plus the cache entry that should refresh the store) or a typed error.
#[derive(Debug)]
pub enum Response<T> {
    Success {
        result: T,
        cache_entry: Option<CacheEntry>,
        /// Marks a delivery that may be followed by a second, more
        /// authoritative one (a soft-expired cache hit served while a
        /// background revalidation is in flight). The dispatcher owns that
        /// protocol; the envelope only carries the flag.
        intermediate: bool,
    },
    Failure { error: EngineError },
}

impl<T> Response<T> {
    pub fn success(result: T, cache_entry: Option<CacheEntry>) -> Self {
        Response::Success {
            result,
            cache_entry,
            intermediate: false,
        }
    }

    pub fn error(error: EngineError) -> Self {
        Response::Failure { error }
    }

    /// Flag this delivery as possibly followed by a second one.
    pub fn into_intermediate(self) -> Self {
        match self {
            Response::Success {
                result,
                cache_entry,
                ..
            } => Response::Success {
                result,
                cache_entry,
                intermediate: true,
            },
            failure => failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    pub fn is_intermediate(&self) -> bool {
        matches!(
            self,
            Response::Success {
                intermediate: true,
                ..
            }
        )
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            Response::Success { result, .. } => Some(result),
            Response::Failure { .. } => None,
        }
    }

    pub fn cache_entry(&self) -> Option<&CacheEntry> {
        match self {
            Response::Success { cache_entry, .. } => cache_entry.as_ref(),
            Response::Failure { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<T, EngineError> {
        match self {
            Response::Success { result, .. } => Ok(result),
            Response::Failure { error } => Err(error),
        }
    }
}
