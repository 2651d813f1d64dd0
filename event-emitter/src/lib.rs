//! # audiohub Events
//!
//! Typed, totally-ordered lifecycle records produced by the audiohub core and
//! consumed by whatever transport sits in front of it (WebSocket push, logs,
//! a test harness).
//!
//! ## Usage
//!
//! ```rust
//! use event_emitter::{EventEmitter, EventType};
//! use serde_json::json;
//!
//! let emitter = EventEmitter::default();
//! let mut stream = emitter.subscribe();
//!
//! emitter.emit(EventType::TransitionStart, json!({ "from": null, "to": "radio" }));
//!
//! let event = stream.try_recv().unwrap();
//! assert_eq!(event.name(), "system.transition_start");
//! ```
//!
//! ## Delivery
//!
//! The emitter makes no delivery promises beyond ordering: records are not
//! persisted, and a subscriber only sees what was emitted after it subscribed.
//! Replay and fan-out to remote clients belong to the transport layer.

pub mod emitter;
pub mod event;

pub use emitter::{EventEmitter, EventStream, DEFAULT_BUFFER_SIZE};
pub use event::{Event, EventCategory, EventType};
