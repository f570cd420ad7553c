//! The background task that ticks the flush controller.
//!
//! Three events drive a flush: the periodic interval elapsing, a
//! producer waking the task because the buffer just crossed the batch
//! size, or shutdown being requested. All three race in one
//! `tokio::select!` over a flush-interval/wake/shutdown set of signals.
//! Whether a backoff is still armed is `flush_once`'s own call, checked
//! fresh at the moment it runs rather than once before the `select!`
//! blocks — a backoff that expires while this task is waiting must not
//! cause the wake that follows to be skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::buffer::Buffer;
use crate::flush::FlushController;

/// Handle to a spawned driver task: a notifier to wake it early and a
/// join handle so shutdown can wait for its last flush to land.
pub struct Driver {
    pub wake: Arc<Notify>,
    pub shutdown: Arc<Notify>,
    pub handle: tokio::task::JoinHandle<()>,
}

impl Driver {
    pub fn spawn(
        controller: Arc<FlushController>,
        buffer: Arc<Mutex<Buffer>>,
        flush_interval: Duration,
        batch_size: usize,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let wake_clone = wake.clone();
        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(async move {
            run(controller, buffer, flush_interval, batch_size, wake_clone, shutdown_clone).await;
        });

        Driver {
            wake,
            shutdown,
            handle,
        }
    }
}

async fn run(
    controller: Arc<FlushController>,
    buffer: Arc<Mutex<Buffer>>,
    flush_interval: Duration,
    batch_size: usize,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.flush_once(&buffer, batch_size).await;
            }
            _ = wake.notified() => {
                controller.flush_once(&buffer, batch_size).await;
            }
            _ = shutdown.notified() => {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::sender::Sender;
    use crate::secret::Secret;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    #[tokio::test]
    async fn wake_triggers_immediate_flush() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/events")
            .with_status(202)
            .expect_at_least(1)
            .create_async()
            .await;

        let sender = Sender::new(format!("{}/v1/events", server.url()), Secret::new("k")).unwrap();
        let dir = tempdir().unwrap();
        let controller = Arc::new(FlushController::new(
            sender,
            dir.path().join("spill.jsonl"),
            1024 * 1024,
            Arc::new(|_| {}),
        ));
        let buffer = Arc::new(Mutex::new(Buffer::new(10)));
        buffer.lock().await.push(Event::new("GET", "/", 200));

        let driver = Driver::spawn(controller, buffer.clone(), Duration::from_secs(3600), 10);
        driver.wake.notify_one();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(buffer.lock().await.is_empty());

        driver.shutdown.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(1), driver.handle).await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let sender = Sender::new("https://localhost/v1/events".into(), Secret::new("k")).unwrap();
        let dir = tempdir().unwrap();
        let controller = Arc::new(FlushController::new(
            sender,
            dir.path().join("spill.jsonl"),
            1024 * 1024,
            Arc::new(|_| {}),
        ));
        let buffer = Arc::new(Mutex::new(Buffer::new(10)));

        let driver = Driver::spawn(controller, buffer, Duration::from_secs(3600), 10);
        driver.shutdown.notify_one();
        let result = tokio::time::timeout(Duration::from_secs(1), driver.handle).await;
        assert!(result.is_ok());
        let _ = Ordering::SeqCst;
    }
}
