//! Scripted in-memory collaborators
//!
//! [`SimulatedPlugin`] and [`SimulatedServiceController`] implement the plugin
//! and service contracts without touching the OS. Behavior is scripted per
//! call so tests can drive timeouts, transient failures, and recoveries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::binding::DeviceBinding;
use crate::error::{PluginError, ServiceError};
use crate::plugin::{AudioPlugin, Metadata};
use crate::service::ServiceController;
use crate::source::{PluginState, SourceId};

// ============================================================================
// SimulatedPlugin
// ============================================================================

/// How a [`SimulatedPlugin`] reacts to one `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Report `Connected` before `start` returns
    Immediate,
    /// Report `Connecting`, then `Connected` after the delay
    After(Duration),
    /// Report `Connecting` and stay there
    Never,
    /// Report `Error` after `start` returns successfully
    ReportError,
    /// Return an error from `start`
    FailStart,
}

/// In-memory [`AudioPlugin`] with scripted connection behavior
pub struct SimulatedPlugin {
    id: SourceId,
    status: watch::Sender<PluginState>,
    default_behavior: Mutex<ConnectBehavior>,
    queued: Mutex<VecDeque<ConnectBehavior>>,
    fail_stop: AtomicBool,
    start_count: AtomicU32,
    stop_count: AtomicU32,
    bindings: Mutex<Vec<DeviceBinding>>,
    pending: Mutex<Option<JoinHandle<()>>>,
    metadata: Mutex<Metadata>,
}

impl SimulatedPlugin {
    /// A plugin that connects immediately on every start
    pub fn new(id: SourceId) -> Self {
        Self::with_behavior(id, ConnectBehavior::Immediate)
    }

    pub fn with_behavior(id: SourceId, behavior: ConnectBehavior) -> Self {
        let (status, _rx) = watch::channel(PluginState::Inactive);
        Self {
            id,
            status,
            default_behavior: Mutex::new(behavior),
            queued: Mutex::new(VecDeque::new()),
            fail_stop: AtomicBool::new(false),
            start_count: AtomicU32::new(0),
            stop_count: AtomicU32::new(0),
            bindings: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
            metadata: Mutex::new(Metadata::new()),
        }
    }

    /// Behavior for every start that has no queued override
    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        *self.default_behavior.lock() = behavior;
    }

    /// Behavior for the next start only; queued overrides are consumed in order
    pub fn queue_behavior(&self, behavior: ConnectBehavior) {
        self.queued.lock().push_back(behavior);
    }

    /// Make `stop` return an error (the plugin still goes inactive)
    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::Relaxed);
    }

    /// Push a status change, as a real plugin would on a dropped connection
    pub fn set_status(&self, state: PluginState) {
        self.status.send_replace(state);
    }

    pub fn set_metadata(&self, metadata: Metadata) {
        *self.metadata.lock() = metadata;
    }

    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::Relaxed)
    }

    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::Relaxed)
    }

    /// Every binding passed to `start`, oldest first
    pub fn bindings(&self) -> Vec<DeviceBinding> {
        self.bindings.lock().clone()
    }

    pub fn last_binding(&self) -> Option<DeviceBinding> {
        self.bindings.lock().last().cloned()
    }

    fn next_behavior(&self) -> ConnectBehavior {
        self.queued
            .lock()
            .pop_front()
            .unwrap_or(*self.default_behavior.lock())
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl AudioPlugin for SimulatedPlugin {
    fn source_id(&self) -> SourceId {
        self.id
    }

    async fn start(&self, binding: &DeviceBinding) -> Result<(), PluginError> {
        self.cancel_pending();
        self.start_count.fetch_add(1, Ordering::Relaxed);
        self.bindings.lock().push(binding.clone());
        self.status.send_replace(PluginState::Starting);

        match self.next_behavior() {
            ConnectBehavior::Immediate => {
                self.status.send_replace(PluginState::Connected);
            }
            ConnectBehavior::After(delay) => {
                self.status.send_replace(PluginState::Connecting);
                let status = self.status.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    status.send_replace(PluginState::Connected);
                });
                *self.pending.lock() = Some(handle);
            }
            ConnectBehavior::Never => {
                self.status.send_replace(PluginState::Connecting);
            }
            ConnectBehavior::ReportError => {
                self.status.send_replace(PluginState::Error);
            }
            ConnectBehavior::FailStart => {
                self.status.send_replace(PluginState::Error);
                return Err(PluginError::StartFailed(format!(
                    "{} refused to start on {}",
                    self.id, binding
                )));
            }
        }

        Ok(())
    }

    async fn stop(&self) -> Result<(), PluginError> {
        self.cancel_pending();
        self.stop_count.fetch_add(1, Ordering::Relaxed);
        self.status.send_replace(PluginState::Inactive);

        if self.fail_stop.load(Ordering::Relaxed) {
            return Err(PluginError::StopFailed(format!("{} did not exit cleanly", self.id)));
        }
        Ok(())
    }

    fn status(&self) -> PluginState {
        *self.status.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<PluginState> {
        self.status.subscribe()
    }

    fn metadata(&self) -> Metadata {
        self.metadata.lock().clone()
    }
}

// ============================================================================
// SimulatedServiceController
// ============================================================================

/// Which controller primitive was invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAction {
    Start,
    Stop,
}

impl ServiceAction {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
        }
    }
}

/// One recorded controller call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCall {
    pub action: ServiceAction,
    pub unit: String,
}

#[derive(Debug, Clone, Copy)]
enum FailurePlan {
    Times(u32),
    Always,
}

/// In-memory [`ServiceController`] with scripted failures and delays
#[derive(Default)]
pub struct SimulatedServiceController {
    running: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<(ServiceAction, String), FailurePlan>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<ServiceCall>>,
}

impl SimulatedServiceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` attempts of `action` on `unit`
    pub fn fail_next(&self, action: ServiceAction, unit: &str, times: u32) {
        self.failures
            .lock()
            .insert((action, unit.to_string()), FailurePlan::Times(times));
    }

    /// Fail every attempt of `action` on `unit` until cleared
    pub fn fail_always(&self, action: ServiceAction, unit: &str) {
        self.failures
            .lock()
            .insert((action, unit.to_string()), FailurePlan::Always);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Delay every call on `unit`; calls slower than their timeout fail with
    /// [`ServiceError::Timeout`]
    pub fn set_delay(&self, unit: &str, delay: Duration) {
        self.delays.lock().insert(unit.to_string(), delay);
    }

    pub fn set_running(&self, unit: &str, running: bool) {
        let mut set = self.running.lock();
        if running {
            set.insert(unit.to_string());
        } else {
            set.remove(unit);
        }
    }

    pub fn is_running(&self, unit: &str) -> bool {
        self.running.lock().contains(unit)
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, action: ServiceAction, unit: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.action == action && call.unit == unit)
            .count()
    }

    fn take_failure(&self, action: ServiceAction, unit: &str) -> bool {
        let mut failures = self.failures.lock();
        let key = (action, unit.to_string());
        match failures.get_mut(&key) {
            Some(FailurePlan::Always) => true,
            Some(FailurePlan::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    async fn attempt(
        &self,
        action: ServiceAction,
        unit: &str,
        timeout: Duration,
    ) -> Result<(), ServiceError> {
        self.calls.lock().push(ServiceCall {
            action,
            unit: unit.to_string(),
        });

        let delay = self.delays.lock().get(unit).copied();
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ServiceError::Timeout {
                    action: action.as_str(),
                    unit: unit.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(delay).await;
        }

        if self.take_failure(action, unit) {
            return Err(ServiceError::CommandFailed {
                action: action.as_str(),
                unit: unit.to_string(),
                status: Some(1),
                stderr: "simulated failure".to_string(),
            });
        }

        self.set_running(unit, action == ServiceAction::Start);
        Ok(())
    }
}

#[async_trait]
impl ServiceController for SimulatedServiceController {
    async fn start_unit(&self, name: &str, timeout: Duration) -> Result<(), ServiceError> {
        self.attempt(ServiceAction::Start, name, timeout).await
    }

    async fn stop_unit(&self, name: &str, timeout: Duration) -> Result<(), ServiceError> {
        self.attempt(ServiceAction::Stop, name, timeout).await
    }

    async fn is_active(&self, name: &str) -> bool {
        self.is_running(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plugin_queued_behaviors_run_in_order() {
        let plugin = SimulatedPlugin::new(SourceId::Radio);
        plugin.queue_behavior(ConnectBehavior::Never);

        let binding = DeviceBinding::new("radio_direct");
        plugin.start(&binding).await.unwrap();
        assert_eq!(plugin.status(), PluginState::Connecting);

        plugin.start(&binding).await.unwrap();
        assert_eq!(plugin.status(), PluginState::Connected);
        assert_eq!(plugin.start_count(), 2);
    }

    #[tokio::test]
    async fn test_plugin_delayed_connect_notifies_subscribers() {
        let plugin =
            SimulatedPlugin::with_behavior(SourceId::Radio, ConnectBehavior::After(Duration::from_millis(20)));
        let mut rx = plugin.subscribe();

        plugin.start(&DeviceBinding::new("radio_direct")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while *rx.borrow_and_update() != PluginState::Connected {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_plugin_stop_cancels_pending_connect() {
        let plugin =
            SimulatedPlugin::with_behavior(SourceId::Radio, ConnectBehavior::After(Duration::from_millis(20)));
        plugin.start(&DeviceBinding::new("radio_direct")).await.unwrap();
        plugin.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(plugin.status(), PluginState::Inactive);
    }

    #[tokio::test]
    async fn test_controller_scripted_failures() {
        let controller = SimulatedServiceController::new();
        controller.fail_next(ServiceAction::Start, "snapserver.service", 2);

        let timeout = Duration::from_secs(1);
        assert!(controller.start_unit("snapserver.service", timeout).await.is_err());
        assert!(controller.start_unit("snapserver.service", timeout).await.is_err());
        assert!(!controller.is_active("snapserver.service").await);

        controller.start_unit("snapserver.service", timeout).await.unwrap();
        assert!(controller.is_active("snapserver.service").await);
        assert_eq!(controller.call_count(ServiceAction::Start, "snapserver.service"), 3);
    }

    #[tokio::test]
    async fn test_controller_delay_exceeding_timeout() {
        let controller = SimulatedServiceController::new();
        controller.set_delay("slow.service", Duration::from_millis(200));

        let err = controller
            .start_unit("slow.service", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { action: "start", .. }));
        assert!(!controller.is_running("slow.service"));
    }
}
