//! # audiohub
//!
//! Coordinates a single active audio source on a shared playback device.
//! Source switches are mutually exclusive, bounded by hard deadlines, and
//! rolled back on failure; routing changes (direct vs. synchronized
//! multi-room output, equalizer on/off) rebind the playing source and drive
//! the relay service units with a retry policy. Every accepted operation
//! leaves an ordered trail of lifecycle events, and the routing and source
//! selection survive restarts in a checksum-verified document.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use audiohub::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     audiohub::logging::init_logging(LoggingMode::Development)?;
//!
//!     let hub = AudioHub::builder()
//!         .with_config(HubConfig::for_path("/var/lib/audiohub/config.json"))
//!         .register_plugin(Arc::new(my_radio_plugin()))
//!         .start()
//!         .await?;
//!
//!     let mut events = hub.subscribe();
//!     hub.request_source("radio").await?;
//!     hub.set_routing_mode(RoutingMode::Synchronized).await?;
//!
//!     while let Some(event) = events.try_recv() {
//!         println!("{} {}", event.name(), event.data);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! All mutating operations share one lock. A request that arrives while
//! another operation holds it fails immediately with
//! [`ErrorKind::ConcurrencyError`]; nothing is queued.

pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod retry;
pub mod routing;
pub mod source;
pub mod state;

pub use config::{default_config_path, HubConfig};
pub use error::{CoordinatorError, ErrorKind, LastError, Outcome, Result};
pub use hub::{default_document, AudioHub, AudioHubBuilder};
pub use retry::{RetryError, RetryPolicy};
pub use routing::{device_binding, RoutingChange, RoutingConfig, RoutingMode};
pub use source::{parse_target, NONE_SENTINEL};
pub use state::SystemState;

pub use event_emitter::{Event, EventCategory, EventStream, EventType};
pub use plugin_api::{
    AudioPlugin, DeviceBinding, Metadata, PluginError, PluginRegistry, PluginState,
    ServiceController, ServiceError, SourceId, SystemctlController,
};

/// Common imports for embedding the hub
pub mod prelude {
    pub use crate::logging::LoggingMode;
    pub use crate::{
        AudioHub, AudioPlugin, CoordinatorError, ErrorKind, Event, EventType, HubConfig,
        Outcome, PluginState, RetryPolicy, RoutingMode, ServiceController, SourceId,
        SystemState,
    };
}
