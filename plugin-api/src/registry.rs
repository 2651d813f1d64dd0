//! Static source → plugin registry
//!
//! The registry is assembled once at startup through [`PluginRegistryBuilder`]
//! and is immutable afterwards; the core resolves plugins by [`SourceId`] and
//! never adds or removes them at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::plugin::AudioPlugin;
use crate::source::SourceId;

/// Immutable mapping from source identifier to plugin implementation
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<SourceId, Arc<dyn AudioPlugin>>,
}

impl PluginRegistry {
    pub fn builder() -> PluginRegistryBuilder {
        PluginRegistryBuilder::default()
    }

    /// Plugin registered for `id`
    pub fn get(&self, id: SourceId) -> Option<&Arc<dyn AudioPlugin>> {
        self.plugins.get(&id)
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.plugins.contains_key(&id)
    }

    /// Registered identifiers in a stable order
    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.plugins.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("sources", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`PluginRegistry`]
#[derive(Default)]
pub struct PluginRegistryBuilder {
    plugins: BTreeMap<SourceId, Arc<dyn AudioPlugin>>,
}

impl PluginRegistryBuilder {
    /// Register `plugin` under its own [`AudioPlugin::source_id`]
    ///
    /// Registering a second plugin for the same source replaces the first.
    pub fn register(mut self, plugin: Arc<dyn AudioPlugin>) -> Self {
        let id = plugin.source_id();
        if self.plugins.insert(id, plugin).is_some() {
            tracing::warn!("Plugin for source {} registered twice, keeping the last", id);
        }
        self
    }

    pub fn build(self) -> PluginRegistry {
        tracing::debug!("Plugin registry built with {} sources", self.plugins.len());
        PluginRegistry {
            plugins: self.plugins,
        }
    }
}
