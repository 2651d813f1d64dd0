//! Routing configuration and device binding derivation
//!
//! The routing configuration is persisted as `data.routing`. Device bindings
//! are never stored; they are derived from the source and the configuration
//! every time a plugin is started.

pub(crate) mod coordinator;

use std::fmt;
use std::str::FromStr;

use event_emitter::EventType;
use plugin_api::{DeviceBinding, SourceId};
use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;

/// Where the active source's audio goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Straight to the local amplifier
    #[default]
    Direct,
    /// Through the relay units to every speaker
    Synchronized,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Direct => "direct",
            RoutingMode::Synchronized => "synchronized",
        }
    }

    /// Segment used in device bindings
    fn binding_segment(&self) -> &'static str {
        match self {
            RoutingMode::Direct => "direct",
            RoutingMode::Synchronized => "multiroom",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingMode {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(RoutingMode::Direct),
            "synchronized" => Ok(RoutingMode::Synchronized),
            other => Err(CoordinatorError::InvalidRoutingMode(other.to_string())),
        }
    }
}

/// Persisted routing settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
    pub equalizer_enabled: bool,
}

impl RoutingConfig {
    pub fn new(mode: RoutingMode, equalizer_enabled: bool) -> Self {
        Self {
            mode,
            equalizer_enabled,
        }
    }

    /// This configuration with `change` applied
    pub fn apply(self, change: RoutingChange) -> Self {
        match change {
            RoutingChange::Mode(mode) => Self { mode, ..self },
            RoutingChange::Equalizer(enabled) => Self {
                equalizer_enabled: enabled,
                ..self
            },
        }
    }
}

/// Virtual sink name for `source` under `routing`
///
/// `<source>_<direct|multiroom>`, with `_eq` appended when the equalizer is on.
pub fn device_binding(source: SourceId, routing: &RoutingConfig) -> DeviceBinding {
    let mut name = format!("{}_{}", source.as_str(), routing.mode.binding_segment());
    if routing.equalizer_enabled {
        name.push_str("_eq");
    }
    DeviceBinding::new(name)
}

/// One requested routing change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingChange {
    Mode(RoutingMode),
    Equalizer(bool),
}

impl RoutingChange {
    pub(crate) fn pending_event(&self) -> EventType {
        match self {
            RoutingChange::Mode(RoutingMode::Synchronized) => EventType::MultiroomEnabling,
            RoutingChange::Mode(RoutingMode::Direct) => EventType::MultiroomDisabling,
            RoutingChange::Equalizer(true) => EventType::EqualizerEnabling,
            RoutingChange::Equalizer(false) => EventType::EqualizerDisabling,
        }
    }

    pub(crate) fn ready_event(&self) -> EventType {
        match self {
            RoutingChange::Mode(_) => EventType::MultiroomReady,
            RoutingChange::Equalizer(_) => EventType::EqualizerReady,
        }
    }

    pub(crate) fn error_event(&self) -> EventType {
        match self {
            RoutingChange::Mode(_) => EventType::MultiroomError,
            RoutingChange::Equalizer(_) => EventType::EqualizerError,
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            RoutingChange::Mode(mode) => format!("routing mode {}", mode),
            RoutingChange::Equalizer(true) => "equalizer on".to_string(),
            RoutingChange::Equalizer(false) => "equalizer off".to_string(),
        }
    }
}
