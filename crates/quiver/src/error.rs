//! # Error taxonomy
//!
//! Typed failures produced while executing a request. Timeout, auth-failure,
//! and redirect conditions are routed through the request's retry policy and
//! only surface once the policy exhausts its budget; every other class
//! surfaces on first occurrence.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::response::NetworkResponse;

/// Errors surfaced by request execution.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A transport attempt exceeded its per-attempt timeout.
    #[error("request timed out")]
    Timeout,

    /// No response could be obtained at all. Not retried.
    #[error("no connection could be established")]
    NoConnection(#[source] std::io::Error),

    /// The request target cannot be parsed as a URL. A configuration error,
    /// not a transient condition.
    #[error("malformed request target: {url}")]
    MalformedTarget { url: String },

    /// 401/403 with a readable body, carried for inspection.
    #[error("authentication failure (status {})", .0.status)]
    AuthFailure(NetworkResponse),

    /// 301/302 observed. The redirect target has already been recorded on
    /// the request; the hop is paid for out of the retry budget.
    #[error("redirected (status {})", .0.status)]
    Redirect(NetworkResponse),

    /// Any other out-of-range status with a readable body.
    #[error("server error (status {})", .0.status)]
    Server(NetworkResponse),

    /// A response was obtained but its body could not be read.
    #[error("network failure")]
    Network {
        status: Option<StatusCode>,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The origin answered 304 but no cached entry was attached to the
    /// request, so there is no payload to serve.
    #[error("not-modified response without a cached entry")]
    UnexpectedNotModified { headers: HeaderMap },

    /// Payload decoding failed. Originates above the engine, never retried.
    #[error("failed to decode response body")]
    Decode(#[from] DecodeError),
}

impl EngineError {
    /// Whether this class is eligible for another attempt through the
    /// retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout | EngineError::AuthFailure(_) | EngineError::Redirect(_)
        )
    }

    /// The response carried by this error, when one was obtained.
    pub fn network_response(&self) -> Option<&NetworkResponse> {
        match self {
            EngineError::AuthFailure(response)
            | EngineError::Redirect(response)
            | EngineError::Server(response) => Some(response),
            _ => None,
        }
    }

    /// The status code associated with this error, when one is known.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            EngineError::Network { status, .. } => *status,
            EngineError::UnexpectedNotModified { .. } => Some(StatusCode::NOT_MODIFIED),
            _ => self.network_response().map(|response| response.status),
        }
    }
}

/// Failures turning a raw payload into a typed result.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid json payload")]
    Json(#[from] serde_json::Error),

    #[error("payload is not valid {charset}")]
    Charset { charset: String },
}
