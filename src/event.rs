//! The sanitized event record and the sanitizer that produces it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_METHOD_LEN: usize = 16;
const MAX_PATH_LEN: usize = 2048;
const MAX_CONSUMER_ID_LEN: usize = 256;

/// One served-request record, as produced by a framework adapter and
/// buffered by [`crate::Client::track`].
///
/// Fields are intentionally permissive on construction — [`sanitize`] is
/// the coercion boundary that enforces the closed schema described by the
/// crate's invariants. Construct with [`Event::new`] and the builder
/// methods, or via `Default` plus field assignment in tests.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Event {
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub response_time_ms: f64,
    #[serde(default)]
    pub request_size: u64,
    #[serde(default)]
    pub response_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub timestamp: String,
}

impl Event {
    pub fn new(method: impl Into<String>, path: impl Into<String>, status_code: u16) -> Self {
        Event {
            method: method.into(),
            path: path.into(),
            status_code,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_response_time_ms(mut self, ms: f64) -> Self {
        self.response_time_ms = ms;
        self
    }

    #[must_use]
    pub fn with_request_size(mut self, bytes: u64) -> Self {
        self.request_size = bytes;
        self
    }

    #[must_use]
    pub fn with_response_size(mut self, bytes: u64) -> Self {
        self.response_size = bytes;
        self
    }

    #[must_use]
    pub fn with_consumer_id(mut self, consumer_id: impl Into<String>) -> Self {
        self.consumer_id = Some(consumer_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Normalize and bound a single event, enforcing the per-event byte
/// ceiling. Never panics; returns `None` when the event must be dropped
/// (it is still too large even without `metadata`).
pub fn sanitize(mut event: Event, max_event_bytes: usize) -> Option<Event> {
    truncate_at_char_boundary(&mut event.method, MAX_METHOD_LEN);
    event.method = event.method.to_uppercase();

    truncate_at_char_boundary(&mut event.path, MAX_PATH_LEN);

    if let Some(consumer_id) = event.consumer_id.as_mut() {
        truncate_at_char_boundary(consumer_id, MAX_CONSUMER_ID_LEN);
    }

    if event.timestamp.is_empty() {
        event.timestamp = Utc::now().to_rfc3339();
    }

    if serialized_len(&event) <= max_event_bytes {
        return Some(event);
    }

    event.metadata = None;
    if serialized_len(&event) <= max_event_bytes {
        return Some(event);
    }

    None
}

fn serialized_len(event: &Event) -> usize {
    serde_json::to_vec(event).map(|v| v.len()).unwrap_or(usize::MAX)
}

fn truncate_at_char_boundary(s: &mut String, max_len: usize) {
    if s.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
