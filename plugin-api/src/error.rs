//! Error types for plugins and service controllers.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by an [`AudioPlugin`](crate::AudioPlugin)
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin failed to start: {0}")]
    StartFailed(String),

    #[error("Plugin failed to stop: {0}")]
    StopFailed(String),

    #[error("Plugin unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a single [`ServiceController`](crate::ServiceController) call
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The control command ran but reported failure
    #[error("{action} {unit} failed (status {status:?}): {stderr}")]
    CommandFailed {
        action: &'static str,
        unit: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The control command did not finish in time
    #[error("{action} {unit} timed out after {timeout:?}")]
    Timeout {
        action: &'static str,
        unit: String,
        timeout: Duration,
    },

    /// The control command could not be launched
    #[error("Failed to run {action} for {unit}: {source}")]
    Spawn {
        action: &'static str,
        unit: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other adapter-specific failure
    #[error("{0}")]
    Other(String),
}
