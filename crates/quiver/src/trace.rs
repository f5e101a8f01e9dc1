//! Per-request diagnostic trace.
//!
//! An append-only marker log tracing the lifetime of one request. Advisory
//! telemetry only; nothing in the execution path reads it back.

use chrono::Utc;
use parking_lot::Mutex;

/// One recorded marker.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub tag: String,
    /// Identity of the worker that recorded the marker.
    pub worker: String,
    pub at_epoch_ms: i64,
}

/// Append-only event log for a single request.
#[derive(Debug, Default)]
pub struct EventTrace {
    events: Mutex<Vec<TraceEvent>>,
}

impl EventTrace {
    /// Record a marker with the current worker identity and timestamp.
    pub fn add(&self, tag: impl Into<String>) {
        let current = std::thread::current();
        let worker = current
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{:?}", current.id()));
        self.events.lock().push(TraceEvent {
            tag: tag.into(),
            worker,
            at_epoch_ms: Utc::now().timestamp_millis(),
        });
    }

    /// Copy of all markers recorded so far.
    pub fn snapshot(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Number of markers whose tag contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.tag.contains(needle))
            .count()
    }

    /// Dump the trace to the log, keyed by a request description.
    pub fn finish(&self, header: &str) {
        let events = self.snapshot();
        let Some((first, last)) = events.first().zip(events.last()) else {
            return;
        };
        tracing::debug!(
            request = header,
            duration_ms = last.at_epoch_ms - first.at_epoch_ms,
            markers = events.len(),
            "request trace complete"
        );
        for event in &events {
            tracing::trace!(
                request = header,
                tag = %event.tag,
                worker = %event.worker,
                at = event.at_epoch_ms,
                "marker"
            );
        }
    }
}
