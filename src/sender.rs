//! The single HTTP call a flush makes, and the classification of its
//! outcome into a shape the flush controller can act on.

use std::time::Duration;

use reqwest::{Client as HttpClient, StatusCode};

use crate::error::SendError;
use crate::event::Event;
use crate::secret::{Redactor, Secret};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BODY_SNIPPET: usize = 1024;
const SDK_HEADER: &str = "x-httpbeacon-sdk";
const SDK_HEADER_VALUE: &str = concat!("rust/", env!("CARGO_PKG_VERSION"));

/// Thin wrapper around a `reqwest::Client` configured for ingestion
/// POSTs: fixed timeout, no connection reuse assumptions beyond what
/// `reqwest` already gives us.
#[derive(Clone)]
pub struct Sender {
    http: HttpClient,
    endpoint: String,
    api_key: Secret,
    redactor: std::sync::Arc<Redactor>,
}

impl Sender {
    pub fn new(endpoint: String, api_key: Secret) -> Result<Self, reqwest::Error> {
        let http = HttpClient::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Sender {
            http,
            endpoint,
            api_key,
            redactor: std::sync::Arc::new(Redactor::new()),
        })
    }

    /// POST a batch of events to the ingestion endpoint, classifying the
    /// result as success, a retryable failure, or a non-retryable one.
    pub async fn send(&self, events: &[Event]) -> Result<(), SendError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", self.api_key.expose_secret())
            .header(SDK_HEADER, SDK_HEADER_VALUE)
            .json(events)
            .send()
            .await
            .map_err(|e| {
                // Anything short of a malformed request (a bug in this
                // crate, never in data the caller controls) is a
                // transport-level failure — DNS, connect, timeout, TLS,
                // a reset mid-request — and worth retrying.
                if e.is_builder() {
                    SendError::NonRetryable(format!("request build error: {e}"))
                } else {
                    SendError::Retryable(format!("transport error: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(MAX_BODY_SNIPPET).collect();
        // The response body is operator/attacker-controlled content from
        // the ingestion endpoint; scrub anything secret-shaped out of it
        // before it can reach `on_error` or a tracing sink.
        let snippet = self.redactor.redact(&snippet);
        classify(status, &snippet)
    }
}

fn classify(status: StatusCode, body_snippet: &str) -> Result<(), SendError> {
    if status.is_success() {
        return Ok(());
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => {
            Err(SendError::Retryable(format!("status {status}: {body_snippet}")))
        }
        _ => Err(SendError::NonRetryable(format!("status {status}: {body_snippet}"))),
    }
}
