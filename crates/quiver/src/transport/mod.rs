//! # Transport boundary
//!
//! The engine drives an opaque transport capability one attempt at a time;
//! the bundled reqwest implementation lives in [`http`]. A transport
//! resolves to a raw response exposing status, headers, and an unread body
//! stream, or to a typed failure the engine classifies.

pub mod http;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::io::AsyncRead;

use crate::request::Request;

/// Failures raised by a transport before a usable response exists.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket timed out mid-exchange.
    #[error("socket timed out")]
    Timeout,

    /// The connection could not be established in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// The target is not a valid URL.
    #[error("malformed url: {url}")]
    MalformedUrl { url: String },

    /// Connection-level failure with no response at all.
    #[error("transport i/o failure")]
    Io(#[from] std::io::Error),
}

/// Streaming response body plus the advertised length, if any.
pub struct ResponseBody {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    length: Option<u64>,
}

impl ResponseBody {
    pub fn new(reader: impl AsyncRead + Send + 'static, length: Option<u64>) -> Self {
        Self {
            reader: Box::pin(reader),
            length,
        }
    }

    /// Body backed by an in-memory buffer, mainly for fakes and tests.
    pub fn from_bytes(data: Bytes) -> Self {
        let length = Some(data.len() as u64);
        Self::new(std::io::Cursor::new(data), length)
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub(crate) fn into_parts(self) -> (Pin<Box<dyn AsyncRead + Send>>, Option<u64>) {
        (self.reader, self.length)
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Raw transport response: status and headers, with the body left
/// unconsumed so the engine can read it through its buffer pool. `body` is
/// `None` when the response genuinely has no body (distinct from a
/// zero-length one).
#[derive(Debug)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Option<ResponseBody>,
}

/// One-attempt HTTP capability the engine is generic over.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform a single attempt against the request's current target.
    /// `extra_headers` are the engine-built conditional headers and take
    /// precedence over the request's own; `timeout` bounds this attempt
    /// only.
    async fn perform(
        &self,
        request: &Request,
        extra_headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<RawResponse, TransportError>;
}
