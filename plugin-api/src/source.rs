//! Source identifiers and plugin lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of an audio input source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Streaming receiver
    Spotify,
    /// Wireless pairing
    Bluetooth,
    /// Network audio relay
    Roc,
    /// Internet radio
    Radio,
    /// Podcast player
    Podcast,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::Spotify,
        SourceId::Bluetooth,
        SourceId::Roc,
        SourceId::Radio,
        SourceId::Podcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Spotify => "spotify",
            SourceId::Bluetooth => "bluetooth",
            SourceId::Roc => "roc",
            SourceId::Radio => "radio",
            SourceId::Podcast => "podcast",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known source identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source identifier: {0:?}")]
pub struct ParseSourceError(pub String);

impl FromStr for SourceId {
    type Err = ParseSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| ParseSourceError(s.to_string()))
    }
}

/// Lifecycle of a source's plugin
///
/// Plugins report `Starting`, `Connecting`, `Connected`, or `Error`. `Inactive`
/// is the state of a plugin that has not been started or has been stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    #[default]
    Inactive,
    Starting,
    Connecting,
    Connected,
    Error,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::Inactive => "inactive",
            PluginState::Starting => "starting",
            PluginState::Connecting => "connecting",
            PluginState::Connected => "connected",
            PluginState::Error => "error",
        }
    }

    /// Whether the plugin is still on its way to `Connected`
    pub fn is_pending(&self) -> bool {
        matches!(self, PluginState::Starting | PluginState::Connecting)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
