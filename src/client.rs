//! The public entry point: construct a [`Client`], call [`Client::track`]
//! from request-handling code, and let the background driver handle
//! delivery.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bon::bon;
use tokio::sync::{Mutex, Notify};

use crate::buffer::Buffer;
use crate::driver::Driver;
use crate::error::{Error, Result, SendError};
use crate::event::{self, Event};
use crate::flush::{FlushController, OnError};
use crate::secret::Secret;
use crate::sender::Sender;
use crate::ssrf;
use crate::storage;

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;
const DEFAULT_MAX_STORAGE_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_MAX_EVENT_BYTES: usize = 64 * 1024;

/// Reject an `api_key` containing C0, C1, or DEL control characters —
/// such a value could never legitimately come from an API-key-issuing
/// system and most likely indicates a misconfigured or injected value.
fn validate_api_key(api_key: &str) -> Result<()> {
    if api_key.is_empty() {
        return Err(Error::Config("api_key is required".into()));
    }
    if api_key.chars().any(|c| c.is_control()) {
        return Err(Error::Config(
            "api_key must not contain control characters".into(),
        ));
    }
    Ok(())
}

struct Inner {
    buffer: Arc<Mutex<Buffer>>,
    controller: Arc<FlushController>,
    wake: Arc<Notify>,
    shutdown_notify: Arc<Notify>,
    driver_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutting_down: AtomicBool,
    max_event_bytes: usize,
    batch_size: usize,
    /// Enables extra `trace!`-level diagnostics on the producer path,
    /// independent of whatever level filter the host's `tracing`
    /// subscriber is configured with.
    debug: bool,
}

/// A buffered, crash-resilient collector for HTTP request events.
///
/// `Client` is cheap to clone (it wraps an `Arc`); clone it into every
/// request-handling task rather than sharing a reference. [`Client::track`]
/// never blocks and never panics — the worst it will do on a saturated
/// buffer is silently drop the new event while nudging the driver to
/// relieve the backlog.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

#[bon]
impl Client {
    /// Construct and start a client.
    ///
    /// Validates `endpoint` against the SSRF allowlist rules, replays any
    /// events left over from a previous process's disk spill, and spawns
    /// the background driver task. Must be called from within a Tokio
    /// runtime (the driver is `tokio::spawn`ed immediately).
    #[builder]
    pub async fn builder(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        #[builder(default = DEFAULT_FLUSH_INTERVAL)] flush_interval: Duration,
        #[builder(default = DEFAULT_BATCH_SIZE)] batch_size: usize,
        #[builder(default = DEFAULT_MAX_BUFFER_SIZE)] max_buffer_size: usize,
        #[builder(default = DEFAULT_MAX_STORAGE_BYTES)] max_storage_bytes: u64,
        #[builder(default = DEFAULT_MAX_EVENT_BYTES)] max_event_bytes: usize,
        #[builder(default = std::env::temp_dir())] storage_dir: PathBuf,
        #[builder(default = false)] debug: bool,
        on_error: Option<OnError>,
    ) -> Result<Self> {
        let endpoint = ssrf::validate_endpoint(&endpoint.into())?;
        let api_key = api_key.into();
        validate_api_key(&api_key)?;
        let api_key = Secret::new(api_key);

        let storage_path = storage::storage_path(&storage_dir, &endpoint);
        let recovered = match storage::recover(&storage_path).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read spilled events, starting empty");
                Vec::new()
            }
        };
        if !recovered.is_empty() {
            tracing::debug!(count = recovered.len(), "recovered spilled events from disk");
        }
        // The `.recovering` file itself is left in place: it is only
        // deleted once a send actually succeeds (see `FlushController`),
        // so a crash before that still leaves the events recoverable.

        let mut buffer = Buffer::new(max_buffer_size);
        buffer.requeue_front(recovered);
        let buffer = Arc::new(Mutex::new(buffer));

        let sender = Sender::new(endpoint, api_key)
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let on_error = on_error.unwrap_or_else(|| Arc::new(|_: SendError| {}));
        let controller = Arc::new(FlushController::new(
            sender,
            storage_path,
            max_storage_bytes,
            on_error,
        ));

        let driver = Driver::spawn(controller.clone(), buffer.clone(), flush_interval, batch_size);

        let inner = Arc::new(Inner {
            buffer,
            controller,
            wake: driver.wake,
            shutdown_notify: driver.shutdown,
            driver_handle: Mutex::new(Some(driver.handle)),
            shutting_down: AtomicBool::new(false),
            max_event_bytes,
            batch_size,
            debug,
        });

        Client::spawn_signal_task(Arc::downgrade(&inner));

        Ok(Client { inner })
    }

    /// Construct a client from `HTTPBEACON_ENDPOINT` / `HTTPBEACON_API_KEY`,
    /// with the remaining options at their defaults. `HTTPBEACON_DEBUG`,
    /// if set to `1` or `true`, enables extra trace diagnostics.
    pub async fn from_env() -> Result<Self> {
        let endpoint = std::env::var("HTTPBEACON_ENDPOINT")
            .map_err(|_| Error::Config("HTTPBEACON_ENDPOINT environment variable not set".into()))?;
        let api_key = std::env::var("HTTPBEACON_API_KEY")
            .map_err(|_| Error::Config("HTTPBEACON_API_KEY environment variable not set".into()))?;
        let debug = matches!(
            std::env::var("HTTPBEACON_DEBUG").as_deref(),
            Ok("1") | Ok("true")
        );

        Client::builder()
            .endpoint(endpoint)
            .api_key(api_key)
            .debug(debug)
            .build()
            .await
    }
}

impl Client {
    /// Buffer a request event for later delivery. Never blocks, never
    /// panics, and never reports failure to the caller — a dropped or
    /// rejected event surfaces only through the configured `on_error`
    /// callback, never here.
    pub fn track(&self, event: Event) {
        if self.inner.debug {
            tracing::trace!(method = %event.method, path_len = event.path.len(), "track() called");
        }

        let Some(sanitized) = event::sanitize(event, self.inner.max_event_bytes) else {
            tracing::debug!("dropping event that exceeds the per-event size ceiling");
            return;
        };

        match self.inner.buffer.try_lock() {
            Ok(mut guard) => {
                if !guard.push(sanitized) {
                    tracing::debug!("buffer full, dropping event");
                }
            }
            Err(_) => {
                tracing::warn!("buffer lock contended, dropping event rather than blocking");
            }
        }

        // Nudge the driver regardless of outcome: a full buffer needs it
        // even more urgently than a normal append does.
        self.inner.wake.notify_one();
    }

    /// Force an immediate flush attempt, bypassing the flush interval.
    /// Still subject to an armed backoff and the single-flight and
    /// consecutive-failure invariants.
    pub async fn flush(&self) {
        self.inner
            .controller
            .flush_once(&self.inner.buffer, self.inner.batch_size)
            .await;
    }

    /// Gracefully stop the background driver, make one final flush
    /// attempt, and spill anything still unsent to disk. Idempotent —
    /// safe to call more than once or from both application code and the
    /// signal handler.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown_notify.notify_one();
        if let Some(handle) = self.inner.driver_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        self.flush().await;
        self.inner.controller.spill_remaining(&self.inner.buffer).await;
    }

    fn spawn_signal_task(inner: std::sync::Weak<Inner>) {
        tokio::spawn(async move {
            // tokio::signal supports any number of independent listeners
            // for the same signal, so installing one here does not
            // displace a handler the host application installs itself.
            wait_for_termination_signal().await;
            if let Some(inner) = inner.upgrade() {
                let client = Client { inner };
                client.shutdown().await;
            }
        });
    }
}

/// Resolve once the process receives a termination request: SIGTERM or
/// SIGINT on Unix (the signals process managers, `docker stop`, and
/// systemd actually send), Ctrl-C everywhere else.
#[cfg(unix)]
async fn wait_for_termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_notify.notify_one();
        // No event loop reachable from a synchronous `Drop`: this is a
        // best-effort fallback for the case where `shutdown()` was never
        // called and the last clone is going away outside of an explicit
        // shutdown sequence. It cannot await the driver or perform the
        // final network flush; it only unblocks the driver task so it
        // stops polling a dead client.
        tracing::debug!("Client dropped without shutdown(); buffered events may be lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_rejects_invalid_endpoint() {
        let result = Client::builder()
            .endpoint("http://10.0.0.5/v1/events")
            .api_key("k")
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builder_rejects_empty_api_key() {
        let result = Client::builder()
            .endpoint("https://ingest.example.com/v1/events")
            .api_key("")
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn builder_rejects_api_key_with_control_characters() {
        let result = Client::builder()
            .endpoint("https://ingest.example.com/v1/events")
            .api_key("sk-\u{0007}bell")
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn track_and_shutdown_flush_happy_path() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/events")
            .with_status(202)
            .expect_at_least(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = Client::builder()
            .endpoint(format!("{}/v1/events", server.url()))
            .api_key("test-key")
            .storage_dir(dir.path().to_path_buf())
            .flush_interval(Duration::from_secs(3600))
            .build()
            .await
            .unwrap();

        client.track(Event::new("GET", "/hello", 200));
        client.shutdown().await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        server.mock("POST", "/v1/events").with_status(202).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let client = Client::builder()
            .endpoint(format!("{}/v1/events", server.url()))
            .api_key("test-key")
            .storage_dir(dir.path().to_path_buf())
            .build()
            .await
            .unwrap();

        client.shutdown().await;
        client.shutdown().await;
    }
}
