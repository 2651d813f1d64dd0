//! Ordered event fan-out
//!
//! `EventEmitter` stamps every record with a sequence number and timestamp and
//! fans it out over a `tokio::sync::broadcast` channel. Stamping and sending
//! happen under one lock, so subscribers observe records in sequence order
//! even when several tasks emit concurrently.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::event::{Event, EventType};

/// Default channel capacity
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// Cloneable handle that emits lifecycle events
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

struct Inner {
    sender: broadcast::Sender<Event>,
    next_sequence: Mutex<u64>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl EventEmitter {
    /// Create an emitter whose subscribers may fall `buffer_size` records behind
    /// before they start losing the oldest ones
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _rx) = broadcast::channel(buffer_size.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                next_sequence: Mutex::new(1),
            }),
        }
    }

    /// Emit one record and return it
    ///
    /// Emitting with no subscribers is not an error; the record is dropped.
    pub fn emit(&self, event_type: EventType, data: Value) -> Event {
        let mut next = self.inner.next_sequence.lock();
        let event = Event {
            sequence: *next,
            category: event_type.category(),
            event_type,
            data,
            timestamp: Utc::now(),
        };
        *next += 1;

        tracing::debug!(
            "Event #{} {} {}",
            event.sequence,
            event.event_type,
            event.data
        );
        // Err only means nobody is listening.
        let _ = self.inner.sender.send(event.clone());
        event
    }

    /// Subscribe to every record emitted from now on
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.inner.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Sequence number the next record will carry
    pub fn next_sequence(&self) -> u64 {
        *self.inner.next_sequence.lock()
    }
}

/// Receiving half of an [`EventEmitter`] subscription
///
/// A subscriber that falls more than the buffer size behind skips the records
/// it missed; the gap is logged and visible in the sequence numbers.
pub struct EventStream {
    receiver: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Wait for the next record
    ///
    /// Returns `None` once every emitter handle has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next record if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Every record currently queued, oldest first
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
