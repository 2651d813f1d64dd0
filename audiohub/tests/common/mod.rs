//! Shared harness for the audiohub integration tests
//!
//! Every source gets a `SimulatedPlugin`, relay units go through a
//! `SimulatedServiceController`, and the event stream is subscribed before the
//! hub boots so boot warnings are observable.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use audiohub::{AudioHub, Event, EventStream, HubConfig, RetryPolicy, SourceId};
use config_store::{ConfigStore, PersistedDocument};
use event_emitter::EventEmitter;
use plugin_api::testing::{SimulatedPlugin, SimulatedServiceController};
use serde_json::Value;

pub const SNAPSERVER: &str = "snapserver.service";
pub const SNAPCLIENT: &str = "snapclient.service";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join("config.json")
}

/// Short deadlines so timeout paths finish quickly
pub fn fast_config(dir: &Path) -> HubConfig {
    HubConfig::for_path(config_path(dir))
        .with_source_connect_timeout(Duration::from_millis(300))
        .with_routing_transition_timeout(Duration::from_millis(800))
        .with_retry_policy(
            RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20))
                .with_attempt_timeout(Duration::from_millis(100)),
        )
}

pub struct Harness {
    pub hub: AudioHub,
    pub events: EventStream,
    pub plugins: HashMap<SourceId, Arc<SimulatedPlugin>>,
    pub services: Arc<SimulatedServiceController>,
    pub path: PathBuf,
}

impl Harness {
    /// Every source registered, fast config
    pub async fn start(dir: &Path) -> Self {
        Self::start_with(dir, &SourceId::ALL, |config| config).await
    }

    pub async fn start_with(
        dir: &Path,
        sources: &[SourceId],
        tweak: impl FnOnce(HubConfig) -> HubConfig,
    ) -> Self {
        let plugins: HashMap<SourceId, Arc<SimulatedPlugin>> = sources
            .iter()
            .map(|id| (*id, Arc::new(SimulatedPlugin::new(*id))))
            .collect();
        let services = Arc::new(SimulatedServiceController::new());
        let emitter = EventEmitter::new(256);
        let events = emitter.subscribe();

        let mut builder = AudioHub::builder()
            .with_config(tweak(fast_config(dir)))
            .with_service_controller(services.clone())
            .with_event_emitter(emitter);
        for plugin in plugins.values() {
            builder = builder.register_plugin(plugin.clone());
        }
        let hub = builder.start().await.expect("hub should boot");

        Self {
            hub,
            events,
            plugins,
            services,
            path: config_path(dir),
        }
    }

    pub fn plugin(&self, id: SourceId) -> &Arc<SimulatedPlugin> {
        &self.plugins[&id]
    }

    /// Names of every event queued so far, oldest first
    pub fn event_names(&mut self) -> Vec<String> {
        self.events.drain().iter().map(Event::name).collect()
    }

    /// Wait for the next event, failing the test after one second
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(1), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event stream closed")
    }

    /// `data` of the live document on disk
    pub fn persisted(&self) -> Value {
        read_persisted(&self.path)
    }

    /// Make the next save fail by putting a directory where the live file is
    pub fn break_persistence(&self) {
        std::fs::remove_file(&self.path).unwrap();
        std::fs::create_dir(&self.path).unwrap();
        std::fs::write(self.path.join("occupied"), b"x").unwrap();
    }

    pub fn restore_persistence(&self) {
        std::fs::remove_dir_all(&self.path).unwrap();
    }
}

pub fn read_persisted(path: &Path) -> Value {
    let bytes = std::fs::read(path).unwrap();
    PersistedDocument::from_slice(&bytes, path).unwrap().data
}

/// Write `data` as a valid live document before any hub boots
pub fn seed_document(dir: &Path, data: Value) {
    let store = ConfigStore::new(config_path(dir), 3, Value::Null);
    store.save(data).unwrap();
}
