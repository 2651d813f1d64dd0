//! The [`AudioHub`] facade and the core it shares with the state machine and
//! the routing coordinator
//!
//! `HubCore` owns the system state, the operation lock, the plugin registry,
//! the service controller, the persisted document, and the event emitter.
//! Every mutating operation takes the operation lock with `try_lock`, so a
//! second request while one is in flight fails fast with
//! [`CoordinatorError::Busy`] instead of queueing.
//!
//! Operations run on their own task. The caller only awaits the result, so
//! dropping the caller's future cannot cut a switch or its rollback short.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config_store::{ConfigStore, LoadOrigin};
use event_emitter::{EventEmitter, EventStream, EventType};
use parking_lot::{Mutex, RwLock};
use plugin_api::{
    AudioPlugin, DeviceBinding, PluginError, PluginRegistry, PluginRegistryBuilder, PluginState,
    ServiceController, SourceId, SystemctlController,
};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex as OperationLock, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::error::{CoordinatorError, LastError, Result};
use crate::retry::RetryError;
use crate::routing::coordinator::RoutingCoordinator;
use crate::routing::{RoutingChange, RoutingConfig, RoutingMode};
use crate::source::machine::SourceStateMachine;
use crate::state::SystemState;

pub(crate) const ROUTING_KEY: &str = "routing";
pub(crate) const ACTIVE_SOURCE_KEY: &str = "active_source";

/// Document written on first boot
pub fn default_document() -> Value {
    json!({
        ROUTING_KEY: { "mode": "direct", "equalizer_enabled": false },
        ACTIVE_SOURCE_KEY: null
    })
}

/// A hard deadline measured from the start of an operation
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    pub(crate) at: Instant,
    pub(crate) budget: Duration,
}

impl Deadline {
    pub(crate) fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    pub(crate) fn expired(&self, operation: impl Into<String>) -> CoordinatorError {
        CoordinatorError::Timeout {
            operation: operation.into(),
            budget: self.budget,
        }
    }
}

/// Relay unit primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitAction {
    Start,
    Stop,
}

impl UnitAction {
    pub(crate) fn inverse(self) -> Self {
        match self {
            UnitAction::Start => UnitAction::Stop,
            UnitAction::Stop => UnitAction::Start,
        }
    }
}

impl fmt::Display for UnitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitAction::Start => f.write_str("start"),
            UnitAction::Stop => f.write_str("stop"),
        }
    }
}

// ============================================================================
// HubCore
// ============================================================================

pub(crate) struct HubCore {
    pub(crate) config: HubConfig,
    pub(crate) registry: PluginRegistry,
    pub(crate) services: Arc<dyn ServiceController>,
    pub(crate) store: Arc<ConfigStore>,
    pub(crate) events: EventEmitter,
    state: RwLock<SystemState>,
    /// Bumped under the state lock whenever an operation begins; a status
    /// watcher only writes while the epoch it was spawned in is current
    epoch: AtomicU64,
    operation: Arc<OperationLock<()>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HubCore {
    /// Clone of the state, with metadata pulled from the playing plugin
    pub(crate) fn snapshot(&self) -> SystemState {
        let mut state = self.state.read().clone();
        if let Some(plugin) = state.playing_source().and_then(|id| self.registry.get(id)) {
            state.metadata = plugin.metadata();
        }
        state
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&SystemState) -> R) -> R {
        f(&self.state.read())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SystemState) -> R) -> R {
        f(&mut self.state.write())
    }

    pub(crate) fn set_plugin_state(&self, plugin_state: PluginState) {
        self.state.write().plugin_state = plugin_state;
    }

    pub(crate) fn ensure_operational(&self) -> Result<()> {
        if self.state.read().halted {
            return Err(CoordinatorError::Halted);
        }
        Ok(())
    }

    pub(crate) fn plugin(&self, id: SourceId) -> Result<Arc<dyn AudioPlugin>> {
        self.registry
            .get(id)
            .cloned()
            .ok_or(CoordinatorError::UnregisteredSource(id))
    }

    /// Take the operation lock without waiting
    ///
    /// Also retires the status watcher, so nothing but the caller mutates the
    /// state until the guard is dropped.
    pub(crate) fn begin_operation(&self) -> Result<OwnedMutexGuard<()>> {
        let guard = Arc::clone(&self.operation)
            .try_lock_owned()
            .map_err(|_| CoordinatorError::Busy)?;
        {
            let _state = self.state.write();
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.stop_watcher();
        Ok(guard)
    }

    pub(crate) fn emit(&self, event_type: EventType, data: Value) {
        if event_type.is_failure() {
            warn!("Emitting {}: {}", event_type, data);
        }
        self.events.emit(event_type, data);
    }

    pub(crate) fn record_error(&self, err: &CoordinatorError) {
        self.state.write().last_error = Some(LastError::from(err));
    }

    // ------------------------------------------------------------------------
    // Plugins
    // ------------------------------------------------------------------------

    /// Start `id` on `binding` and wait for it to report `connected`
    ///
    /// Intermediate `starting`/`connecting` reports are mirrored into the
    /// state. Fails on an `error` report or when `deadline` passes.
    pub(crate) async fn activate(
        &self,
        id: SourceId,
        binding: &DeviceBinding,
        deadline: Deadline,
    ) -> Result<()> {
        let plugin = self.plugin(id)?;
        let mut status = plugin.subscribe();
        self.set_plugin_state(PluginState::Starting);
        debug!("Starting {} on {}", id, binding);

        match tokio::time::timeout_at(deadline.at, plugin.start(binding)).await {
            Err(_) => {
                self.set_plugin_state(PluginState::Error);
                return Err(deadline.expired(format!("activating {}", id)));
            }
            Ok(Err(source)) => {
                self.set_plugin_state(PluginState::Error);
                return Err(CoordinatorError::Plugin {
                    source_id: id,
                    source,
                });
            }
            Ok(Ok(())) => {}
        }

        let connected = async {
            // A value published before `start` returned is fresh; otherwise the
            // current value predates this start and is skipped.
            let mut fresh = status.has_changed().unwrap_or(false);
            loop {
                if fresh {
                    let current = *status.borrow_and_update();
                    match current {
                        PluginState::Connected => return Ok(()),
                        PluginState::Error => {
                            return Err(CoordinatorError::PluginReportedError(id))
                        }
                        PluginState::Starting | PluginState::Connecting => {
                            self.set_plugin_state(current)
                        }
                        PluginState::Inactive => {}
                    }
                }
                if status.changed().await.is_err() {
                    return Err(CoordinatorError::Plugin {
                        source_id: id,
                        source: PluginError::Unavailable("status channel closed".to_string()),
                    });
                }
                fresh = true;
            }
        };

        let result = match tokio::time::timeout_at(deadline.at, connected).await {
            Ok(result) => result,
            Err(_) => Err(deadline.expired(format!("activating {}", id))),
        };
        self.set_plugin_state(if result.is_ok() {
            PluginState::Connected
        } else {
            PluginState::Error
        });
        result
    }

    /// Stop `id`, logging rather than returning failures
    pub(crate) async fn deactivate(&self, id: SourceId, budget: Duration) {
        if let Some(plugin) = self.registry.get(id) {
            match tokio::time::timeout(budget, plugin.stop()).await {
                Ok(Ok(())) => debug!("Stopped {}", id),
                Ok(Err(e)) => warn!("Stopping {} failed, continuing: {}", id, e),
                Err(_) => warn!("Stopping {} took longer than {:?}, continuing", id, budget),
            }
        }
        self.set_plugin_state(PluginState::Inactive);
    }

    /// Time allowed for a best-effort stop within `deadline`
    ///
    /// Cleanup still gets one attempt timeout once the deadline has passed.
    pub(crate) fn stop_budget(&self, deadline: &Deadline) -> Duration {
        let remaining = deadline.at.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.config.retry.attempt_timeout
        } else {
            remaining.min(self.config.retry.attempt_timeout)
        }
    }

    // ------------------------------------------------------------------------
    // Relay units
    // ------------------------------------------------------------------------

    /// Run one unit action under the retry policy; returns the attempts used
    pub(crate) async fn unit_call(
        &self,
        action: UnitAction,
        unit: &str,
        deadline: &Deadline,
    ) -> Result<u32> {
        let label = format!("{} {}", action, unit);
        let services = &self.services;

        let result = self
            .config
            .retry
            .run(&label, deadline.at, |timeout| {
                let services = Arc::clone(services);
                let unit = unit.to_string();
                async move {
                    match action {
                        UnitAction::Start => services.start_unit(&unit, timeout).await,
                        UnitAction::Stop => services.stop_unit(&unit, timeout).await,
                    }
                }
            })
            .await;

        match result {
            Ok(((), attempts)) => {
                debug!("{} done after {} attempt(s)", label, attempts);
                Ok(attempts)
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => Err(CoordinatorError::Service {
                operation: label,
                attempts,
                message: last_error,
            }),
            Err(e @ RetryError::DeadlineExceeded { .. }) => {
                warn!("{} ran out of time after {} attempt(s)", label, e.attempts());
                Err(deadline.expired(label))
            }
        }
    }

    /// Start every relay unit that is not already running, in order
    ///
    /// Returns the number of retries spent.
    pub(crate) async fn ensure_relay_running(&self, deadline: &Deadline) -> Result<u32> {
        let mut retries = 0;
        for unit in &self.config.relay_units {
            let query = self.services.is_active(unit);
            let running = tokio::time::timeout(self.stop_budget(deadline), query)
                .await
                .unwrap_or(false);
            if running {
                continue;
            }
            let attempts = self.unit_call(UnitAction::Start, unit, deadline).await?;
            retries += attempts.saturating_sub(1);
        }
        Ok(retries)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Write the persisted fields of the current state
    ///
    /// Keys other than `routing` and `active_source` are carried over. Nothing
    /// is written when the document already matches.
    pub(crate) async fn persist(&self) -> Result<()> {
        let (routing, active_source) = self.read(|s| (s.routing(), s.active_source));
        let current = self.store.snapshot();

        let mut data = match current.as_ref() {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.insert(ROUTING_KEY.to_string(), serde_json::to_value(routing)?);
        data.insert(
            ACTIVE_SOURCE_KEY.to_string(),
            serde_json::to_value(active_source)?,
        );
        let data = Value::Object(data);

        if data == *current {
            debug!("Persisted document already up to date");
            return Ok(());
        }

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save(data))
            .await
            .map_err(|e| CoordinatorError::PersistenceTask(e.to_string()))??;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Fatal state
    // ------------------------------------------------------------------------

    /// Enter the halted state after a failed rollback
    pub(crate) fn halt(&self, cause: &CoordinatorError, failures: &[String]) -> CoordinatorError {
        let err = CoordinatorError::RollbackFailed(format!(
            "{} (while recovering from: {})",
            failures.join("; "),
            cause
        ));
        error!("{}; refusing operations until reset", err);

        self.update(|state| {
            state.halted = true;
            state.transitioning = false;
            state.plugin_state = PluginState::Error;
            state.last_error = Some(LastError::from(&err));
        });
        self.emit(
            EventType::Fatal,
            json!({
                "error_kind": err.kind(),
                "message": err.to_string(),
                "state": self.snapshot().to_json(),
            }),
        );
        err
    }

    // ------------------------------------------------------------------------
    // Status watcher
    // ------------------------------------------------------------------------

    /// Mirror later status changes of the connected source into the state
    pub(crate) fn watch_plugin(self: &Arc<Self>, id: SourceId) {
        let Some(plugin) = self.registry.get(id) else {
            return;
        };
        let mut status = plugin.subscribe();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let hub = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let next = *status.borrow_and_update();
                let Some(core) = hub.upgrade() else {
                    break;
                };
                if !core.mirror_status(id, next, epoch) {
                    break;
                }
            }
        });

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Returns false once the watcher that called it is stale
    fn mirror_status(&self, id: SourceId, next: PluginState, epoch: u64) -> bool {
        let mut state = self.state.write();
        if self.epoch.load(Ordering::SeqCst) != epoch || state.active_source != Some(id) {
            return false;
        }
        if state.plugin_state == next {
            return true;
        }

        info!("{} status changed: {} -> {}", id, state.plugin_state, next);
        state.plugin_state = next;
        // Emitted under the state lock so it cannot interleave with an
        // operation that has just begun.
        self.events.emit(
            EventType::StatusChanged,
            json!({ "source": id, "plugin_state": next }),
        );
        true
    }

    pub(crate) fn stop_watcher(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }

    // ------------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------------

    async fn reset(&self) -> Result<()> {
        let _guard = self.begin_operation()?;
        info!("Resetting hub");

        if let Some(active) = self.read(|s| s.active_source) {
            self.deactivate(active, self.config.retry.attempt_timeout)
                .await;
        }

        // The persisted document is the last known-good state.
        let (active_source, routing) = persisted_selection(&self.store, &self.registry);
        self.update(|state| {
            *state = SystemState::restored(active_source, routing);
        });

        self.emit(
            EventType::Reset,
            json!({ "state": self.snapshot().to_json() }),
        );
        Ok(())
    }
}

impl Drop for HubCore {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Source and routing recorded in the store, with unknown or unregistered
/// sources mapped to `None`
fn persisted_selection(
    store: &ConfigStore,
    registry: &PluginRegistry,
) -> (Option<SourceId>, RoutingConfig) {
    let routing = store
        .section::<RoutingConfig>(ROUTING_KEY)
        .unwrap_or_default();
    let active_source = store
        .section::<Option<String>>(ACTIVE_SOURCE_KEY)
        .flatten()
        .and_then(|raw| match raw.parse::<SourceId>() {
            Ok(id) if registry.contains(id) => Some(id),
            Ok(id) => {
                warn!("Persisted source {} has no registered plugin, using none", id);
                None
            }
            Err(e) => {
                warn!("Ignoring persisted source: {}", e);
                None
            }
        });
    (active_source, routing)
}

// ============================================================================
// AudioHub
// ============================================================================

/// Coordinator for the active audio source and the routing configuration
///
/// Cloning is cheap; clones share one state, lock, and event stream.
///
/// ```rust,ignore
/// let hub = AudioHub::builder()
///     .with_config(HubConfig::for_path("/var/lib/audiohub/config.json"))
///     .register_plugin(radio)
///     .start()
///     .await?;
///
/// hub.request_source("radio").await?;
/// hub.set_routing_mode(RoutingMode::Synchronized).await?;
/// ```
#[derive(Clone)]
pub struct AudioHub {
    core: Arc<HubCore>,
}

impl AudioHub {
    pub fn builder() -> AudioHubBuilder {
        AudioHubBuilder::default()
    }

    /// Run `operation` on its own task and wait for it
    ///
    /// The task keeps running if the returned future is dropped, so an
    /// accepted operation always reaches its commit or rollback.
    async fn run_detached<F, Fut>(&self, operation: F) -> Result<()>
    where
        F: FnOnce(Arc<HubCore>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let task = tokio::spawn(operation(Arc::clone(&self.core)));
        task.await.map_err(|e| {
            error!("Operation task ended abnormally: {}", e);
            CoordinatorError::OperationTask(e.to_string())
        })?
    }

    /// Switch the active source to `source`, or to nothing with `"none"`
    pub async fn request_source(&self, source: &str) -> Result<()> {
        let source = source.to_string();
        self.run_detached(|core| async move {
            SourceStateMachine::new(&core).request(&source).await
        })
        .await
    }

    pub async fn set_routing_mode(&self, mode: RoutingMode) -> Result<()> {
        self.run_detached(move |core| async move {
            RoutingCoordinator::new(&core)
                .apply(RoutingChange::Mode(mode))
                .await
        })
        .await
    }

    pub async fn set_equalizer(&self, enabled: bool) -> Result<()> {
        self.run_detached(move |core| async move {
            RoutingCoordinator::new(&core)
                .apply(RoutingChange::Equalizer(enabled))
                .await
        })
        .await
    }

    pub fn get_state(&self) -> SystemState {
        self.core.snapshot()
    }

    /// Clear a halted state and return to the persisted selection with the
    /// plugin stopped
    pub async fn reset(&self) -> Result<()> {
        self.run_detached(|core| async move { core.reset().await })
            .await
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> EventStream {
        self.core.events.subscribe()
    }

    pub fn config(&self) -> &HubConfig {
        &self.core.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.core.store
    }

    /// Stop the active plugin and the status watcher
    pub async fn shutdown(&self) {
        self.core.stop_watcher();
        let _guard = self.core.operation.lock().await;
        if let Some(active) = self.core.read(|s| s.playing_source()) {
            info!("Shutting down, stopping {}", active);
            self.core
                .deactivate(active, self.core.config.retry.attempt_timeout)
                .await;
        }
    }
}

impl fmt::Debug for AudioHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioHub")
            .field("state", &*self.core.state.read())
            .field("plugins", &self.core.registry)
            .finish()
    }
}

// ============================================================================
// AudioHubBuilder
// ============================================================================

/// Builder for [`AudioHub`]
#[derive(Default)]
pub struct AudioHubBuilder {
    config: HubConfig,
    plugins: PluginRegistryBuilder,
    registry: Option<PluginRegistry>,
    services: Option<Arc<dyn ServiceController>>,
    events: Option<EventEmitter>,
}

impl AudioHubBuilder {
    pub fn with_config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_plugin(mut self, plugin: Arc<dyn AudioPlugin>) -> Self {
        self.plugins = self.plugins.register(plugin);
        self
    }

    /// Use a prebuilt registry instead of individually registered plugins
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to [`SystemctlController`]
    pub fn with_service_controller(mut self, services: Arc<dyn ServiceController>) -> Self {
        self.services = Some(services);
        self
    }

    /// Emit through `events`, so boot warnings reach subscribers created
    /// before [`start`](Self::start)
    pub fn with_event_emitter(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Load the persisted document and build the hub
    ///
    /// The persisted source is restored as the active source with its plugin
    /// inactive; activating it again takes an explicit request.
    pub async fn start(self) -> Result<AudioHub> {
        self.config.validate()?;

        let registry = self.registry.unwrap_or_else(|| self.plugins.build());
        let services = self
            .services
            .unwrap_or_else(|| Arc::new(SystemctlController::new()));
        let events = self
            .events
            .unwrap_or_else(|| EventEmitter::new(self.config.event_buffer_size));
        let store = Arc::new(ConfigStore::new(
            &self.config.config_path,
            self.config.backup_depth,
            default_document(),
        ));

        let report = {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || store.load())
                .await
                .map_err(|e| CoordinatorError::PersistenceTask(e.to_string()))?
        };

        match report.origin {
            LoadOrigin::Live => debug!("Loaded {}", store.path().display()),
            LoadOrigin::FirstBoot => info!("First boot, wrote defaults to {}", store.path().display()),
            LoadOrigin::Backup { index } => warn!("Recovered configuration from backup {}", index),
            LoadOrigin::Defaults => warn!("No valid configuration found, using defaults"),
        }
        if report.recovered() {
            events.emit(
                EventType::Warning,
                json!({
                    "message": "persisted configuration failed verification and was recovered",
                    "origin": origin_label(&report.origin),
                    "details": report.warnings,
                }),
            );
        }

        let raw_source = store
            .section::<Option<String>>(ACTIVE_SOURCE_KEY)
            .flatten();
        let (active_source, routing) = persisted_selection(&store, &registry);
        if let (Some(raw), None) = (&raw_source, active_source) {
            events.emit(
                EventType::Warning,
                json!({
                    "message": format!("persisted source {:?} is not available, using none", raw),
                }),
            );
        }

        info!(
            "audiohub ready: source={}, routing={}, equalizer={}, plugins={}",
            active_source.map(|s| s.as_str()).unwrap_or("none"),
            routing.mode,
            routing.equalizer_enabled,
            registry.len()
        );

        let core = HubCore {
            config: self.config,
            registry,
            services,
            store,
            events,
            state: RwLock::new(SystemState::restored(active_source, routing)),
            epoch: AtomicU64::new(0),
            operation: Arc::new(OperationLock::new(())),
            watcher: Mutex::new(None),
        };

        Ok(AudioHub {
            core: Arc::new(core),
        })
    }
}

fn origin_label(origin: &LoadOrigin) -> String {
    match origin {
        LoadOrigin::Live => "live".to_string(),
        LoadOrigin::Backup { index } => format!("backup {}", index),
        LoadOrigin::Defaults => "defaults".to_string(),
        LoadOrigin::FirstBoot => "first_boot".to_string(),
    }
}
