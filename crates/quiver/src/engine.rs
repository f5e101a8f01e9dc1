//! # Execution engine
//!
//! Drives one request to a terminal outcome inside a single bounded loop:
//! conditional-request construction, transport invocation, 304
//! revalidation merging, redirect capture, and failure classification with
//! retry dispatch.
//!
//! The engine holds no cross-request state. One task runs one request's
//! full loop to completion; the only awaits are on the transport, and the
//! only timeout in play is the per-attempt one supplied by the request's
//! retry policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, LOCATION};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::buffer::BufferPool;
use crate::error::EngineError;
use crate::request::Request;
use crate::response::NetworkResponse;
use crate::retry::RetryPolicy;
use crate::transport::{RawResponse, ResponseBody, Transport, TransportError};

const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(3);

/// Largest body preallocation taken from a Content-Length hint.
const MAX_PREALLOCATION: u64 = 64 * 1024;

/// Per-request retry/redirect/validate loop over a pluggable transport.
pub struct ExecutionEngine {
    transport: Arc<dyn Transport>,
    pool: BufferPool,
}

impl ExecutionEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_pool(transport, BufferPool::default())
    }

    pub fn with_pool(transport: Arc<dyn Transport>, pool: BufferPool) -> Self {
        Self { transport, pool }
    }

    /// Drive `request` to a terminal response or a fatal error.
    ///
    /// Timeouts, auth failures, and redirects consult the request's retry
    /// policy; redirect hops therefore share the retry budget, keeping the
    /// total number of transport attempts bounded by the policy alone.
    /// Everything else surfaces on first occurrence.
    pub async fn execute(&self, request: &mut Request) -> Result<NetworkResponse, EngineError> {
        let start = Instant::now();
        loop {
            request.add_marker(format!("network-attempt [url={}]", request.url()));

            let conditional = match request.cache_entry() {
                Some(entry) => entry.conditional_headers(),
                None => HeaderMap::new(),
            };
            let timeout = request.retry_policy().current_timeout();

            let raw = match self.transport.perform(request, &conditional, timeout).await {
                Ok(raw) => raw,
                Err(TransportError::Timeout) => {
                    attempt_retry("socket", request, EngineError::Timeout)?;
                    continue;
                }
                Err(TransportError::ConnectTimeout) => {
                    attempt_retry("connection", request, EngineError::Timeout)?;
                    continue;
                }
                Err(TransportError::MalformedUrl { url }) => {
                    return Err(EngineError::MalformedTarget { url });
                }
                Err(TransportError::Io(source)) => {
                    return Err(EngineError::NoConnection(source));
                }
            };

            let RawResponse {
                status,
                headers,
                body,
            } = raw;

            if status == StatusCode::NOT_MODIFIED {
                return self.revalidate(request, headers, start);
            }

            // 301/302: record the override. The status still falls outside
            // the accepted range below, so the hop is classified and
            // retried against the new target rather than special-cased.
            if is_redirect(status) {
                match location_of(&headers) {
                    Some(location) => request.set_redirect_url(location),
                    None => warn!(url = request.url(), "redirect without a location header"),
                }
            }

            let data = match body {
                Some(body) => match self.read_body(body).await {
                    Ok(data) => data,
                    Err(source) if source.kind() == std::io::ErrorKind::TimedOut => {
                        attempt_retry("socket", request, EngineError::Timeout)?;
                        continue;
                    }
                    Err(source) => {
                        return Err(EngineError::Network {
                            status: Some(status),
                            source: Some(source),
                        });
                    }
                },
                // No body at all: a zero-length payload represents a
                // no-content response honestly.
                None => Bytes::new(),
            };

            let elapsed = start.elapsed();
            self.log_slow(request, status, data.len(), elapsed);

            if status.is_success() {
                return Ok(NetworkResponse::new(status, data, headers, false, elapsed));
            }

            let response = NetworkResponse::new(status, data, headers, false, elapsed);
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                attempt_retry("auth", request, EngineError::AuthFailure(response))?;
            } else if is_redirect(status) {
                debug!(
                    origin = request.origin_url(),
                    target = request.url(),
                    "request redirected"
                );
                attempt_retry("redirect", request, EngineError::Redirect(response))?;
            } else {
                return Err(EngineError::Server(response));
            }
        }
    }

    /// Resolve a 304 against the request's annotated entry.
    ///
    /// A 304 may omit headers present on the original 200, so the cached
    /// mapping is merged with the fresh one (new values win) into a new
    /// snapshot, which also replaces the request's annotation.
    fn revalidate(
        &self,
        request: &mut Request,
        fresh_headers: HeaderMap,
        start: Instant,
    ) -> Result<NetworkResponse, EngineError> {
        let elapsed = start.elapsed();
        let Some(entry) = request.cache_entry() else {
            return Err(EngineError::UnexpectedNotModified {
                headers: fresh_headers,
            });
        };

        let merged = entry.merge_not_modified(&fresh_headers);
        let response = NetworkResponse::new(
            StatusCode::NOT_MODIFIED,
            merged.data.clone(),
            merged.response_headers.clone(),
            true,
            elapsed,
        );
        request.set_cache_entry(merged);
        request.add_marker("not-modified");
        Ok(response)
    }

    /// Drain a response body into one buffer, reading through a pooled
    /// scratch buffer that is returned on every exit path.
    async fn read_body(&self, body: ResponseBody) -> std::io::Result<Bytes> {
        let (mut reader, length) = body.into_parts();
        let prealloc = length.unwrap_or(256).min(MAX_PREALLOCATION) as usize;
        let mut out = BytesMut::with_capacity(prealloc);
        let mut scratch = self.pool.acquire();
        loop {
            let n = reader.read(&mut scratch[..]).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&scratch[..n]);
        }
        Ok(out.freeze())
    }

    fn log_slow(&self, request: &Request, status: StatusCode, size: usize, elapsed: Duration) {
        if elapsed > SLOW_REQUEST_THRESHOLD {
            debug!(
                request = %request,
                lifetime_ms = elapsed.as_millis() as u64,
                size,
                status = status.as_u16(),
                retries = request.retry_policy().current_retry_count(),
                "slow request"
            );
        }
    }
}

/// Ask the policy for another attempt, recording the decision on the
/// request's trace. Hands the error back when the budget is exhausted.
fn attempt_retry(
    log_prefix: &str,
    request: &mut Request,
    error: EngineError,
) -> Result<(), EngineError> {
    let timeout = request.retry_policy().current_timeout();
    match request.retry_policy_mut().retry(error) {
        Ok(()) => {
            request.add_marker(format!(
                "{log_prefix}-retry [timeout={}ms]",
                timeout.as_millis()
            ));
            Ok(())
        }
        Err(error) => {
            request.add_marker(format!(
                "{log_prefix}-timeout-giveup [timeout={}ms]",
                timeout.as_millis()
            ));
            Err(error)
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND
}

fn location_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::request::{IdentifierSource, Request};
    use crate::retry::DefaultRetryPolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::header::HeaderValue;
    use std::collections::VecDeque;

    #[inline]
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    enum Step {
        Respond {
            status: StatusCode,
            headers: Vec<(&'static str, &'static str)>,
            body: Option<&'static [u8]>,
        },
        Fail(TransportError),
    }

    /// Transport fake that replays a fixed script and records what each
    /// attempt asked for.
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<(String, HeaderMap)>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_urls(&self) -> Vec<String> {
            self.attempts.lock().iter().map(|(url, _)| url.clone()).collect()
        }

        fn attempt_headers(&self, index: usize) -> HeaderMap {
            self.attempts.lock()[index].1.clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn perform(
            &self,
            request: &Request,
            extra_headers: &HeaderMap,
            _timeout: Duration,
        ) -> Result<RawResponse, TransportError> {
            self.attempts
                .lock()
                .push((request.url().to_owned(), extra_headers.clone()));
            match self.steps.lock().pop_front().expect("script exhausted") {
                Step::Respond {
                    status,
                    headers,
                    body,
                } => {
                    let mut map = HeaderMap::new();
                    for (name, value) in headers {
                        map.insert(
                            name.parse::<reqwest::header::HeaderName>().unwrap(),
                            HeaderValue::from_str(value).unwrap(),
                        );
                    }
                    Ok(RawResponse {
                        status,
                        headers: map,
                        body: body.map(|data| ResponseBody::from_bytes(Bytes::from_static(data))),
                    })
                }
                Step::Fail(error) => Err(error),
            }
        }
    }

    fn ok(body: &'static [u8]) -> Step {
        Step::Respond {
            status: StatusCode::OK,
            headers: vec![],
            body: Some(body),
        }
    }

    fn request_with_policy(url: &str, max_retries: u32) -> Request {
        let ids = IdentifierSource::new();
        Request::get(url, &ids)
            .with_retry_policy(DefaultRetryPolicy::new(2_500, max_retries, 1.0))
    }

    #[tokio::test]
    async fn success_returns_the_body() {
        let transport = ScriptedTransport::new(vec![ok(b"hello")]);
        let engine = ExecutionEngine::new(transport.clone());
        let mut request = request_with_policy("http://a.example/x", 0);

        let response = engine.execute(&mut request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(&response.data[..], b"hello");
        assert!(!response.not_modified);
    }

    #[tokio::test]
    async fn missing_body_is_materialized_as_zero_length() {
        let transport = ScriptedTransport::new(vec![Step::Respond {
            status: StatusCode::NO_CONTENT,
            headers: vec![],
            body: None,
        }]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 0);

        let response = engine.execute(&mut request).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(response.data.is_empty());
    }

    #[tokio::test]
    async fn conditional_headers_are_built_from_the_annotated_entry() {
        let transport = ScriptedTransport::new(vec![ok(b"fresh")]);
        let engine = ExecutionEngine::new(transport.clone());

        let mut request = request_with_policy("http://a.example/x", 0);
        request.set_cache_entry(CacheEntry {
            etag: Some("\"v1\"".to_string()),
            last_modified: 784_111_777_000,
            ..CacheEntry::default()
        });

        engine.execute(&mut request).await.unwrap();

        let sent = transport.attempt_headers(0);
        assert_eq!(sent.get("if-none-match").unwrap(), "\"v1\"");
        assert_eq!(
            sent.get("if-modified-since").unwrap(),
            "Sun, 06 Nov 1994 08:49:37 GMT"
        );
    }

    #[tokio::test]
    async fn not_modified_serves_the_cached_payload_with_merged_headers() {
        let transport = ScriptedTransport::new(vec![Step::Respond {
            status: StatusCode::NOT_MODIFIED,
            headers: vec![("etag", "\"v2\""), ("date", "Mon, 18 Jul 2016 16:06:00 GMT")],
            body: None,
        }]);
        let engine = ExecutionEngine::new(transport);

        let mut cached_headers = HeaderMap::new();
        cached_headers.insert("etag", HeaderValue::from_static("\"v1\""));
        cached_headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let mut request = request_with_policy("http://a.example/x", 0);
        request.set_cache_entry(CacheEntry {
            data: Bytes::from_static(b"cached payload"),
            etag: Some("\"v1\"".to_string()),
            response_headers: cached_headers,
            ..CacheEntry::default()
        });

        let response = engine.execute(&mut request).await.unwrap();
        assert!(response.not_modified);
        assert_eq!(response.status, StatusCode::NOT_MODIFIED);
        assert_eq!(&response.data[..], b"cached payload");

        // Every header from both responses, with the 304's values winning.
        assert_eq!(response.headers.get("etag").unwrap(), "\"v2\"");
        assert_eq!(response.headers.get("content-type").unwrap(), "text/plain");
        assert!(response.headers.contains_key("date"));

        // The request's annotation was swapped to the merged snapshot.
        let entry = request.cache_entry().unwrap();
        assert_eq!(entry.response_headers.get("etag").unwrap(), "\"v2\"");
        assert_eq!(&entry.data[..], b"cached payload");
    }

    #[tokio::test]
    async fn not_modified_without_an_entry_is_a_typed_error() {
        let transport = ScriptedTransport::new(vec![Step::Respond {
            status: StatusCode::NOT_MODIFIED,
            headers: vec![("etag", "\"v2\"")],
            body: None,
        }]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 3);

        let result = engine.execute(&mut request).await;
        match result {
            Err(EngineError::UnexpectedNotModified { headers }) => {
                assert_eq!(headers.get("etag").unwrap(), "\"v2\"");
            }
            other => panic!("expected UnexpectedNotModified, got {other:?}"),
        }
        // Fatal on first occurrence, not retried.
        assert_eq!(request.retry_policy().current_retry_count(), 0);
    }

    #[tokio::test]
    async fn timeouts_exhaust_the_policy_then_surface() {
        init_tracing();
        let transport = ScriptedTransport::new(vec![
            Step::Fail(TransportError::Timeout),
            Step::Fail(TransportError::Timeout),
            Step::Fail(TransportError::Timeout),
        ]);
        let engine = ExecutionEngine::new(transport.clone());
        let mut request = request_with_policy("http://a.example/x", 2);

        let result = engine.execute(&mut request).await;
        assert!(matches!(result, Err(EngineError::Timeout)));

        // Three attempts: two granted retries, then the give-up.
        assert_eq!(transport.attempt_urls().len(), 3);
        assert_eq!(request.trace().count_matching("-retry"), 2);
        assert_eq!(request.trace().count_matching("-giveup"), 1);
    }

    #[tokio::test]
    async fn connect_timeouts_are_classified_as_timeouts() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(TransportError::ConnectTimeout),
            ok(b"recovered"),
        ]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 1);

        let response = engine.execute(&mut request).await.unwrap();
        assert_eq!(&response.data[..], b"recovered");
        assert_eq!(request.trace().count_matching("connection-retry"), 1);
    }

    #[tokio::test]
    async fn redirects_mutate_the_target_and_consume_a_retry() {
        init_tracing();
        let transport = ScriptedTransport::new(vec![
            Step::Respond {
                status: StatusCode::MOVED_PERMANENTLY,
                headers: vec![("location", "https://b.example/x")],
                body: Some(b""),
            },
            ok(b"moved content"),
        ]);
        let engine = ExecutionEngine::new(transport.clone());
        let mut request = request_with_policy("http://a.example/x", 1);

        let response = engine.execute(&mut request).await.unwrap();
        assert_eq!(&response.data[..], b"moved content");

        assert_eq!(
            transport.attempt_urls(),
            vec!["http://a.example/x", "https://b.example/x"]
        );
        assert_eq!(request.origin_url(), "http://a.example/x");
        assert_eq!(request.url(), "https://b.example/x");
        assert_eq!(request.retry_policy().current_retry_count(), 1);
        assert_eq!(request.trace().count_matching("redirect-retry"), 1);
    }

    #[tokio::test]
    async fn redirect_budget_exhaustion_surfaces_the_redirect_error() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond {
                status: StatusCode::FOUND,
                headers: vec![("location", "http://b.example/1")],
                body: Some(b""),
            },
            Step::Respond {
                status: StatusCode::FOUND,
                headers: vec![("location", "http://b.example/2")],
                body: Some(b""),
            },
        ]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 1);

        let result = engine.execute(&mut request).await;
        match result {
            Err(EngineError::Redirect(response)) => {
                assert_eq!(response.status, StatusCode::FOUND);
            }
            other => panic!("expected Redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_failures_are_retried_with_the_response_attached() {
        let transport = ScriptedTransport::new(vec![
            Step::Respond {
                status: StatusCode::UNAUTHORIZED,
                headers: vec![],
                body: Some(b"login required"),
            },
            ok(b"authorized now"),
        ]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 1);

        let response = engine.execute(&mut request).await.unwrap();
        assert_eq!(&response.data[..], b"authorized now");
        assert_eq!(request.trace().count_matching("auth-retry"), 1);
    }

    #[tokio::test]
    async fn auth_exhaustion_carries_the_response_for_inspection() {
        let transport = ScriptedTransport::new(vec![Step::Respond {
            status: StatusCode::FORBIDDEN,
            headers: vec![],
            body: Some(b"denied"),
        }]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 0);

        let result = engine.execute(&mut request).await;
        match result {
            Err(EngineError::AuthFailure(response)) => {
                assert_eq!(response.status, StatusCode::FORBIDDEN);
                assert_eq!(&response.data[..], b"denied");
            }
            other => panic!("expected AuthFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_fatal_on_first_occurrence() {
        let transport = ScriptedTransport::new(vec![Step::Respond {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers: vec![],
            body: Some(b"boom"),
        }]);
        let engine = ExecutionEngine::new(transport.clone());
        let mut request = request_with_policy("http://a.example/x", 5);

        let result = engine.execute(&mut request).await;
        match result {
            Err(EngineError::Server(response)) => {
                assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(&response.data[..], b"boom");
            }
            other => panic!("expected Server, got {other:?}"),
        }
        assert_eq!(transport.attempt_urls().len(), 1);
    }

    #[tokio::test]
    async fn connection_failures_are_fatal_on_first_occurrence() {
        let transport = ScriptedTransport::new(vec![Step::Fail(TransportError::Io(
            std::io::Error::other("connection refused"),
        ))]);
        let engine = ExecutionEngine::new(transport.clone());
        let mut request = request_with_policy("http://a.example/x", 5);

        let result = engine.execute(&mut request).await;
        assert!(matches!(result, Err(EngineError::NoConnection(_))));
        assert_eq!(transport.attempt_urls().len(), 1);
        assert_eq!(request.retry_policy().current_retry_count(), 0);
    }

    #[tokio::test]
    async fn malformed_targets_are_fatal() {
        let transport = ScriptedTransport::new(vec![Step::Fail(TransportError::MalformedUrl {
            url: "::junk::".to_string(),
        })]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("::junk::", 5);

        let result = engine.execute(&mut request).await;
        assert!(matches!(
            result,
            Err(EngineError::MalformedTarget { url }) if url == "::junk::"
        ));
    }

    #[tokio::test]
    async fn every_attempt_is_recorded_on_the_trace() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(TransportError::Timeout),
            ok(b"eventually"),
        ]);
        let engine = ExecutionEngine::new(transport);
        let mut request = request_with_policy("http://a.example/x", 1);

        engine.execute(&mut request).await.unwrap();
        assert_eq!(request.trace().count_matching("network-attempt"), 2);
    }
}
