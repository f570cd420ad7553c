//! The bounded in-memory queue shared between producer threads and the
//! background flush task.

use crate::event::Event;

/// In-memory holding area for sanitized events awaiting a flush.
///
/// Not thread-safe on its own — callers wrap it in `Mutex<Buffer>`.
/// Overflow policy: once `max_len` is reached, `push` becomes a no-op.
/// Events already buffered are never evicted to make room for a new one —
/// the caller (`Client::track`) is expected to nudge the driver instead so
/// the backlog drains rather than silently losing older, already-accepted
/// events.
pub struct Buffer {
    events: Vec<Event>,
    max_len: usize,
    dropped: u64,
}

impl Buffer {
    pub fn new(max_len: usize) -> Self {
        Buffer {
            events: Vec::new(),
            max_len,
            dropped: 0,
        }
    }

    /// Push a sanitized event. Returns `true` if appended, `false` if the
    /// buffer was already at `max_len` (the event is dropped, not an
    /// existing one).
    pub fn push(&mut self, event: Event) -> bool {
        if self.events.len() >= self.max_len {
            self.dropped += 1;
            return false;
        }
        self.events.push(event);
        true
    }

    /// Re-insert events at the front, clipping from the front if the
    /// combined length would exceed `max_len`. Used when a batch fails to
    /// send and is handed back to the buffer for a later retry.
    pub fn requeue_front(&mut self, mut events: Vec<Event>) {
        events.extend(std::mem::take(&mut self.events));
        let overflow = events.len().saturating_sub(self.max_len);
        if overflow > 0 {
            events.drain(0..overflow);
            self.dropped += overflow as u64;
        }
        self.events = events;
    }

    /// Remove and return up to `n` events from the front.
    pub fn drain_front(&mut self, n: usize) -> Vec<Event> {
        let n = n.min(self.events.len());
        self.events.drain(0..n).collect()
    }

    /// Remove and return every buffered event, leaving the buffer empty.
    /// Used by `shutdown` for the final drain-to-disk.
    pub fn drain_all(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Count of events rejected for arriving while already at `max_len`,
    /// since construction.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.max_len
    }
}
