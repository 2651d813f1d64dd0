//! # plugin-api
//!
//! The boundary between the audiohub core and the things it drives but does not
//! implement: the per-source audio plugins and the OS service manager.
//!
//! - [`AudioPlugin`]: start/stop/status contract every audio source implements
//! - [`ServiceController`]: single-attempt start/stop/query of OS service units;
//!   retry policy lives in the core
//! - [`PluginRegistry`]: static map from [`SourceId`] to plugin, built once at startup
//! - [`SystemctlController`]: a `systemctl`-backed [`ServiceController`]
//!
//! With the `test-support` feature, the [`testing`] module provides scripted
//! in-memory implementations of both traits.

mod binding;
mod error;
mod plugin;
mod registry;
mod service;
mod source;
mod systemd;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use binding::DeviceBinding;
pub use error::{PluginError, ServiceError};
pub use plugin::{AudioPlugin, Metadata};
pub use registry::{PluginRegistry, PluginRegistryBuilder};
pub use service::ServiceController;
pub use source::{ParseSourceError, PluginState, SourceId};
pub use systemd::SystemctlController;
