//! # Request model
//!
//! A request describes one HTTP call: verb, target, priority, identity, and
//! cache affinity. Requests form a total order (higher priority first, FIFO
//! within a priority band) once the dispatcher has assigned a sequence
//! number; comparing requests before that point is a programming error and
//! fails fast.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};

use crate::cache::CacheEntry;
use crate::retry::{DefaultRetryPolicy, RetryPolicy};
use crate::trace::EventTrace;

/// Supported HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
    Patch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request priorities. Requests are processed from higher priorities to
/// lower priorities, in FIFO order within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Immediate,
}

/// Identifier generator: a strictly increasing counter combined with the
/// verb, the target, and a coarse timestamp, hashed to a fixed-width hex
/// string.
///
/// The counter never resets while the source lives and is the sole
/// uniqueness guarantee for requests created within the same millisecond.
/// One source is meant to be owned by the dispatcher and shared by
/// reference.
#[derive(Debug, Default)]
pub struct IdentifierSource {
    counter: AtomicU64,
}

impl IdentifierSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next identifier for a `method`/`url` pair.
    pub fn next_identifier(&self, method: Method, url: &str) -> String {
        let count = self.counter.fetch_add(1, AtomicOrdering::Relaxed);
        let stamp = Utc::now().timestamp_millis();
        let mut hasher = Sha256::new();
        hasher.update(format!("request:{method}:{url}:{stamp}:{count}"));
        hex::encode(hasher.finalize())
    }
}

/// Dispatcher-side hook notified exactly once when a request finishes,
/// whether with a response or a fatal error.
pub trait CompletionSink: Send + Sync {
    fn on_finish(&self, request: &Request);
}

/// One HTTP call: target, ordering identity, cache affinity, and retry
/// state.
pub struct Request {
    method: Method,
    url: String,
    /// Redirect target recorded from a 3xx response; shadows `url` while
    /// set. The origin URL itself never changes.
    redirect_url: Option<String>,
    identifier: String,
    tag: Option<String>,
    priority: Priority,
    sequence: Option<u64>,
    should_cache: bool,
    headers: HeaderMap,
    body: Option<Bytes>,
    body_content_type: Option<String>,
    form_params: Vec<(String, String)>,
    canceled: AtomicBool,
    delivered: AtomicBool,
    finished: AtomicBool,
    /// Entry previously stored for this request's cache key, annotated here
    /// so a 304 can be merged even if the store has since evicted it.
    cache_entry: Option<CacheEntry>,
    retry_policy: Box<dyn RetryPolicy>,
    completion: Option<Arc<dyn CompletionSink>>,
    trace: EventTrace,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>, ids: &IdentifierSource) -> Self {
        let url = url.into();
        let identifier = ids.next_identifier(method, &url);
        Self {
            method,
            url,
            redirect_url: None,
            identifier,
            tag: None,
            priority: Priority::default(),
            sequence: None,
            should_cache: true,
            headers: HeaderMap::new(),
            body: None,
            body_content_type: None,
            form_params: Vec::new(),
            canceled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            cache_entry: None,
            retry_policy: Box::new(DefaultRetryPolicy::default()),
            completion: None,
            trace: EventTrace::default(),
        }
    }

    pub fn get(url: impl Into<String>, ids: &IdentifierSource) -> Self {
        Self::new(Method::Get, url, ids)
    }

    pub fn post(url: impl Into<String>, ids: &IdentifierSource) -> Self {
        Self::new(Method::Post, url, ids)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Opaque tag for bulk cancellation by the dispatcher.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_should_cache(mut self, should_cache: bool) -> Self {
        self.should_cache = should_cache;
        self
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Box::new(policy);
        self
    }

    /// Add an outgoing header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Attach an opaque body with its content type.
    pub fn with_body(mut self, body: Bytes, content_type: impl Into<String>) -> Self {
        self.body = Some(body);
        self.body_content_type = Some(content_type.into());
        self
    }

    /// Add a form parameter, percent-encoded into the body when no opaque
    /// body was attached.
    pub fn with_form_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form_params.push((name.into(), value.into()));
        self
    }

    pub fn with_completion_sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.completion = Some(sink);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Current target: the redirect override when one has been recorded,
    /// the origin URL otherwise.
    pub fn url(&self) -> &str {
        self.redirect_url.as_deref().unwrap_or(&self.url)
    }

    /// Target as originally issued, before any redirects.
    pub fn origin_url(&self) -> &str {
        &self.url
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn should_cache(&self) -> bool {
        self.should_cache
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Stable identity for cache lookups, derived from the verb and the
    /// origin URL.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.method, self.url)
    }

    /// Assign the queue sequence number. Assigning twice is a programming
    /// error and panics.
    pub fn set_sequence(&mut self, sequence: u64) {
        assert!(
            self.sequence.is_none(),
            "sequence assigned twice for request {}",
            self.identifier
        );
        self.sequence = Some(sequence);
    }

    /// The queue sequence number.
    ///
    /// # Panics
    ///
    /// Panics when read before the dispatcher has assigned one.
    pub fn sequence(&self) -> u64 {
        match self.sequence {
            Some(sequence) => sequence,
            None => panic!(
                "sequence read before assignment for request {}",
                self.identifier
            ),
        }
    }

    pub fn has_sequence(&self) -> bool {
        self.sequence.is_some()
    }

    pub fn set_redirect_url(&mut self, url: impl Into<String>) {
        self.redirect_url = Some(url.into());
    }

    pub fn set_cache_entry(&mut self, entry: CacheEntry) {
        self.cache_entry = Some(entry);
    }

    pub fn cache_entry(&self) -> Option<&CacheEntry> {
        self.cache_entry.as_ref()
    }

    /// Body to send: the opaque body when present, otherwise the encoded
    /// form parameters, otherwise nothing.
    pub fn body(&self) -> Option<Bytes> {
        if let Some(body) = &self.body {
            return Some(body.clone());
        }
        if self.form_params.is_empty() {
            return None;
        }
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.form_params {
            serializer.append_pair(name, value);
        }
        Some(Bytes::from(serializer.finish().into_bytes()))
    }

    pub fn body_content_type(&self) -> Option<String> {
        if let Some(content_type) = &self.body_content_type {
            return Some(content_type.clone());
        }
        if self.form_params.is_empty() {
            None
        } else {
            Some("application/x-www-form-urlencoded; charset=UTF-8".to_string())
        }
    }

    /// Mark this request as canceled. Advisory: in-flight execution runs to
    /// completion and the dispatcher suppresses delivery.
    pub fn cancel(&self) {
        self.canceled.store(true, AtomicOrdering::SeqCst);
        self.trace.add("canceled");
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(AtomicOrdering::SeqCst)
    }

    /// Mark that a response has been delivered, for suppressing identical
    /// deliveries later in the lifetime.
    pub fn mark_delivered(&self) {
        self.delivered.store(true, AtomicOrdering::SeqCst);
    }

    pub fn has_response_delivered(&self) -> bool {
        self.delivered.load(AtomicOrdering::SeqCst)
    }

    pub fn retry_policy(&self) -> &dyn RetryPolicy {
        &*self.retry_policy
    }

    pub fn retry_policy_mut(&mut self) -> &mut dyn RetryPolicy {
        &mut *self.retry_policy
    }

    /// Record a diagnostic marker.
    pub fn add_marker(&self, tag: impl Into<String>) {
        self.trace.add(tag);
    }

    pub fn trace(&self) -> &EventTrace {
        &self.trace
    }

    /// Close out the request: notify the completion sink and dump the
    /// trace. Idempotent; only the first call has any effect.
    pub fn finish(&self, reason: &str) {
        if self.finished.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        self.trace.add(reason);
        if let Some(sink) = &self.completion {
            sink.on_finish(self);
        }
        self.trace.finish(&self.to_string());
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {} {:?} {}",
            if self.is_canceled() { "[X] " } else { "[ ] " },
            self.method,
            self.url(),
            self.priority,
            match self.sequence {
                Some(sequence) => sequence.to_string(),
                None => "-".to_string(),
            }
        )
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url())
            .field("identifier", &self.identifier)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("should_cache", &self.should_cache)
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Request {}

impl PartialOrd for Request {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Request {
    /// Higher priority sorts first; equal priorities break ties by
    /// ascending sequence for strict FIFO within a band. Intended for
    /// min-ordered queues, where "less" means "runs first". Tie-breaking
    /// panics when either side lacks a sequence.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.sequence().cmp(&other.sequence()))
    }
}
