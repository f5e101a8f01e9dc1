//! # Retry policy
//!
//! The engine treats the policy as the sole authority on continue-vs-abort
//! and performs no attempt counting of its own. Redirect hops share the
//! same budget as transient failures.

use std::time::Duration;

use crate::error::EngineError;

/// Per-request retry/backoff state.
pub trait RetryPolicy: Send + Sync {
    /// Per-attempt timeout for the next transport call. May grow across
    /// attempts.
    fn current_timeout(&self) -> Duration;

    /// Number of retries performed so far. Diagnostic only.
    fn current_retry_count(&self) -> u32;

    /// Prepare internal state for another attempt, or give the error back
    /// when the budget is exhausted and the caller must surface it.
    fn retry(&mut self, error: EngineError) -> Result<(), EngineError>;
}

pub const DEFAULT_TIMEOUT_MS: u64 = 2_500;
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 1.0;

/// Default policy: a fixed retry budget with multiplicative growth of the
/// per-attempt timeout. No sleeping between attempts; the growing timeout
/// is the backoff.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    current_timeout_ms: u64,
    current_retry_count: u32,
    max_retries: u32,
    backoff_multiplier: f32,
}

impl DefaultRetryPolicy {
    pub fn new(initial_timeout_ms: u64, max_retries: u32, backoff_multiplier: f32) -> Self {
        Self {
            current_timeout_ms: initial_timeout_ms,
            current_retry_count: 0,
            max_retries,
            backoff_multiplier,
        }
    }

    fn has_attempt_remaining(&self) -> bool {
        self.current_retry_count <= self.max_retries
    }
}

impl Default for DefaultRetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_TIMEOUT_MS,
            DEFAULT_MAX_RETRIES,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn current_timeout(&self) -> Duration {
        Duration::from_millis(self.current_timeout_ms)
    }

    fn current_retry_count(&self) -> u32 {
        self.current_retry_count
    }

    fn retry(&mut self, error: EngineError) -> Result<(), EngineError> {
        self.current_retry_count += 1;
        self.current_timeout_ms +=
            (self.current_timeout_ms as f32 * self.backoff_multiplier) as u64;
        if self.has_attempt_remaining() {
            Ok(())
        } else {
            Err(error)
        }
    }
}
