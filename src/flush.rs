//! The flush state machine: decide whether a batch can be sent right
//! now, send it, and react to the outcome.
//!
//! A flush either succeeds, fails in a way worth retrying, or fails in a
//! way that will never succeed. Each outcome has exactly one side
//! effect on the controller's state, matching the three-way branch the
//! reference client uses around its own send call:
//!
//! * success — clear the failure counter and any pending backoff.
//! * non-retryable — spill the batch to disk immediately; retrying a
//!   request the endpoint has already rejected wastes a slot without
//!   ever succeeding.
//! * retryable — requeue the batch ahead of newer events, bump the
//!   failure counter, and arm a jittered exponential backoff. Once the
//!   counter crosses [`MAX_CONSECUTIVE_FAILURES`], the endpoint is
//!   treated as down for now: the batch is spilled instead of kept in
//!   memory, and the counter resets so the next attempt starts clean —
//!   no backoff is armed in that case, since there is nothing left
//!   queued for it to gate and the next batch deserves an immediate try.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::buffer::Buffer;
use crate::error::SendError;
use crate::event::Event;
use crate::sender::Sender;

const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub type OnError = Arc<dyn Fn(SendError) + Send + Sync>;

/// Owns the failure counter, backoff deadline, and single-flight flag for
/// one client's flush path. Shared between the driver task and
/// `Client::flush` (for the synchronous forced-flush path) via `Arc`.
pub struct FlushController {
    sender: Sender,
    storage_path: PathBuf,
    max_storage_bytes: u64,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
    backoff_until: Mutex<Option<Instant>>,
    on_error: OnError,
}

impl FlushController {
    pub fn new(
        sender: Sender,
        storage_path: PathBuf,
        max_storage_bytes: u64,
        on_error: OnError,
    ) -> Self {
        FlushController {
            sender,
            storage_path,
            max_storage_bytes,
            in_flight: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            backoff_until: Mutex::new(None),
            on_error,
        }
    }

    /// `None` if no backoff is armed; otherwise how long the caller
    /// should wait before the next flush attempt.
    pub async fn backoff_remaining(&self) -> Option<Duration> {
        let deadline = *self.backoff_until.lock().await;
        deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Remove up to `batch_size` events from the front of `buffer` and
    /// attempt to send them, reacting to the outcome. A no-op if the
    /// buffer is empty, a batch is already in flight, or a backoff is
    /// still armed — the single-flight invariant holds across both the
    /// driver's own wakes and a caller-forced `Client::flush`.
    pub async fn flush_once(&self, buffer: &Mutex<Buffer>, batch_size: usize) {
        if self.in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }

        if self.backoff_remaining().await.is_some() {
            self.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let batch = {
            let mut guard = buffer.lock().await;
            guard.drain_front(batch_size)
        };
        if batch.is_empty() {
            self.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        self.do_flush(batch, buffer).await;
    }

    async fn do_flush(&self, batch: Vec<Event>, buffer: &Mutex<Buffer>) {
        match self.sender.send(&batch).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                *self.backoff_until.lock().await = None;
                self.in_flight.store(false, Ordering::SeqCst);
                if let Err(e) = crate::storage::cleanup_recovery_file(&self.storage_path).await {
                    tracing::warn!(error = %e, "failed to remove spent recovery file");
                }
            }
            Err(err @ SendError::NonRetryable(_)) => {
                self.in_flight.store(false, Ordering::SeqCst);
                tracing::warn!(error = %err, count = batch.len(), "non-retryable send failure, spilling batch");
                self.spill(&batch).await;
                self.invoke_on_error(err);
            }
            Err(err @ SendError::Retryable(_)) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(error = %err, failures, "retryable send failure");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::warn!(failures, "consecutive failure cap reached, spilling batch");
                    self.spill(&batch).await;
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                } else {
                    buffer.lock().await.requeue_front(batch);
                    self.arm_backoff(failures).await;
                }
                self.in_flight.store(false, Ordering::SeqCst);
                self.invoke_on_error(err);
            }
        }
    }

    /// Call the user-supplied callback, catching a panic inside it so a
    /// misbehaving `on_error` can never take the driver task down.
    fn invoke_on_error(&self, err: SendError) {
        let on_error = &self.on_error;
        if std::panic::catch_unwind(AssertUnwindSafe(|| on_error(err))).is_err() {
            tracing::error!("on_error callback panicked; ignoring");
        }
    }

    async fn spill(&self, batch: &[Event]) {
        if let Err(e) = crate::storage::persist(&self.storage_path, batch, self.max_storage_bytes).await {
            tracing::error!(error = %e, "failed to spill batch to disk, events lost");
        }
    }

    /// `BASE_BACKOFF * 2^(failures-1) * uniform(0.5, 1.0)`, capped at
    /// [`MAX_BACKOFF`] before the jitter is applied.
    async fn arm_backoff(&self, failures: u32) {
        let exp = BASE_BACKOFF.saturating_mul(1u32 << failures.saturating_sub(1).min(6));
        let capped = exp.min(MAX_BACKOFF);
        let jitter = rand::rng().random_range(0.5..=1.0);
        let delay = capped.mul_f64(jitter);
        *self.backoff_until.lock().await = Some(Instant::now() + delay);
    }

    /// Drain every event left in `buffer` and spill it, used on shutdown.
    pub async fn spill_remaining(&self, buffer: &Mutex<Buffer>) {
        let remaining = buffer.lock().await.drain_all();
        if !remaining.is_empty() {
            self.spill(&remaining).await;
        }
    }
}
