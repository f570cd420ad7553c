//! Error types for the httpbeacon client

use thiserror::Error;

/// Errors that can occur while constructing a [`crate::Client`].
///
/// This is the only error kind ever surfaced directly to a caller: every
/// error that can happen after construction (a failed send, a full disk
/// spill) is absorbed internally and routed through the configured
/// `on_error` callback instead of propagating.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed attempt to deliver a batch to the ingestion
/// endpoint. Handed to the user-supplied `on_error` callback; never
/// returned from a public method.
#[derive(Error, Debug, Clone)]
pub enum SendError {
    /// Transient failure: network error, timeout, or a 429/5xx response.
    /// The flush controller will re-queue the batch (subject to the
    /// failure cap) and arm a backoff deadline.
    #[error("retryable send failure: {0}")]
    Retryable(String),

    /// Permanent failure: any other HTTP status, or a response the sender
    /// could not make sense of. The flush controller spills the batch to
    /// disk immediately rather than retrying.
    #[error("non-retryable send failure: {0}")]
    NonRetryable(String),
}

impl SendError {
    /// Whether this failure should be retried by the flush controller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Retryable(_))
    }
}
