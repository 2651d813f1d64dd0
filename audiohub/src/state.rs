//! In-memory system state
//!
//! [`SystemState`] is owned by the hub and mutated only while the operation
//! lock is held; callers get clones.

use plugin_api::{DeviceBinding, Metadata, PluginState, SourceId};
use serde::Serialize;
use serde_json::Value;

use crate::error::LastError;
use crate::routing::{device_binding, RoutingConfig, RoutingMode};

/// Snapshot of everything the hub knows about the active source and routing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemState {
    /// `None` means no source is authorized to play
    pub active_source: Option<SourceId>,
    /// Lifecycle of the active source's plugin
    pub plugin_state: PluginState,
    /// True for the whole of a source switch
    pub transitioning: bool,
    pub routing_mode: RoutingMode,
    pub equalizer_enabled: bool,
    /// Relayed from the active plugin, never interpreted
    pub metadata: Metadata,
    pub last_error: Option<LastError>,
    /// Set after a failed rollback; cleared only by a reset
    pub halted: bool,
}

impl SystemState {
    /// State after boot: persisted source and routing, plugin not started
    pub fn restored(active_source: Option<SourceId>, routing: RoutingConfig) -> Self {
        Self {
            active_source,
            plugin_state: PluginState::Inactive,
            transitioning: false,
            routing_mode: routing.mode,
            equalizer_enabled: routing.equalizer_enabled,
            metadata: Metadata::new(),
            last_error: None,
            halted: false,
        }
    }

    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig::new(self.routing_mode, self.equalizer_enabled)
    }

    pub fn set_routing(&mut self, routing: RoutingConfig) {
        self.routing_mode = routing.mode;
        self.equalizer_enabled = routing.equalizer_enabled;
    }

    /// The source that is actually producing audio right now
    pub fn playing_source(&self) -> Option<SourceId> {
        self.active_source
            .filter(|_| self.plugin_state == PluginState::Connected)
    }

    /// Binding the active source is (or would be) started on
    pub fn binding(&self) -> Option<DeviceBinding> {
        self.active_source
            .map(|source| device_binding(source, &self.routing()))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::restored(None, RoutingConfig::default())
    }
}
