//! Routing coordinator
//!
//! Applies a routing mode or equalizer change. With a playing source the plugin
//! is stopped, the relay units are started or stopped for a mode change, and
//! the plugin is restarted on the new binding. Without one only the persisted
//! configuration changes.
//!
//! A failure restores the previous configuration, reissues the inverse of every
//! unit call that succeeded, and restarts the plugin on its original binding.
//! If that restoration fails too the hub halts.

use std::sync::Arc;

use plugin_api::SourceId;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::hub::{Deadline, HubCore, UnitAction};
use crate::routing::{device_binding, RoutingChange, RoutingConfig, RoutingMode};

/// Work done so far, undone in reverse on failure
#[derive(Debug, Default)]
struct Progress {
    plugin_stopped: bool,
    units: Vec<(UnitAction, String)>,
}

pub(crate) struct RoutingCoordinator<'a> {
    core: &'a Arc<HubCore>,
}

impl<'a> RoutingCoordinator<'a> {
    pub(crate) fn new(core: &'a Arc<HubCore>) -> Self {
        Self { core }
    }

    pub(crate) async fn apply(&self, change: RoutingChange) -> Result<()> {
        self.core.ensure_operational()?;
        if self.is_current(change) {
            debug!("{} already in effect", change.describe());
            return Ok(());
        }

        let _guard = self.core.begin_operation()?;
        self.core.ensure_operational()?;

        let playing = self.core.read(|s| s.playing_source());
        if self.is_current(change) {
            debug!("{} already in effect", change.describe());
            if let Some(id) = playing {
                self.core.watch_plugin(id);
            }
            return Ok(());
        }

        let previous = self.core.read(|s| s.routing());
        let next = previous.apply(change);
        let deadline = Deadline::after(self.core.config.routing_transition_timeout);

        info!(
            "Applying {} ({})",
            change.describe(),
            playing.map(|s| s.as_str()).unwrap_or("no active source")
        );
        self.core.emit(
            change.pending_event(),
            json!({
                "previous": previous,
                "target": next,
                "active_source": playing,
            }),
        );

        let mut progress = Progress::default();
        let result = match self
            .reroute(change, playing, next, &deadline, &mut progress)
            .await
        {
            Ok(()) => {
                self.core.update(|s| s.set_routing(next));
                self.core.persist().await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!("{} ready", change.describe());
                self.core.emit(
                    change.ready_event(),
                    json!({ "state": self.core.snapshot().to_json() }),
                );
                if let Some(id) = playing {
                    self.core.watch_plugin(id);
                }
                Ok(())
            }
            Err(cause) => {
                self.roll_back(change, playing, previous, progress, cause)
                    .await
            }
        }
    }

    fn is_current(&self, change: RoutingChange) -> bool {
        self.core.read(|s| {
            let current = s.routing();
            current.apply(change) == current
        })
    }

    async fn reroute(
        &self,
        change: RoutingChange,
        playing: Option<SourceId>,
        next: RoutingConfig,
        deadline: &Deadline,
        progress: &mut Progress,
    ) -> Result<()> {
        let Some(id) = playing else {
            return Ok(());
        };

        debug!("Stopping {} for rebind", id);
        self.core.deactivate(id, self.core.stop_budget(deadline)).await;
        progress.plugin_stopped = true;

        if let RoutingChange::Mode(mode) = change {
            let (action, units): (UnitAction, Vec<&String>) = match mode {
                RoutingMode::Synchronized => {
                    (UnitAction::Start, self.core.config.relay_units.iter().collect())
                }
                RoutingMode::Direct => (
                    UnitAction::Stop,
                    self.core.config.relay_units.iter().rev().collect(),
                ),
            };
            for unit in units {
                self.core.unit_call(action, unit, deadline).await?;
                progress.units.push((action, unit.clone()));
            }
        }

        let binding = device_binding(id, &next);
        self.core.activate(id, &binding, *deadline).await
    }

    async fn roll_back(
        &self,
        change: RoutingChange,
        playing: Option<SourceId>,
        previous: RoutingConfig,
        progress: Progress,
        cause: CoordinatorError,
    ) -> Result<()> {
        error!("{} failed, rolling back: {}", change.describe(), cause);
        self.core.update(|s| s.set_routing(previous));

        let cleanup = Deadline::after(self.core.config.routing_transition_timeout);
        let mut failures = Vec::new();

        if progress.plugin_stopped {
            if let Some(id) = playing {
                // The plugin may be half-started on the new binding.
                self.core.deactivate(id, self.core.stop_budget(&cleanup)).await;
            }
        }

        for (action, unit) in progress.units.iter().rev() {
            let inverse = action.inverse();
            if let Err(e) = self.core.unit_call(inverse, unit, &cleanup).await {
                warn!("Rollback {} {} failed: {}", inverse, unit, e);
                failures.push(format!("{} {}: {}", inverse, unit, e));
            }
        }

        if let Some(id) = playing.filter(|_| progress.plugin_stopped) {
            let binding = device_binding(id, &previous);
            match self.core.activate(id, &binding, cleanup).await {
                Ok(()) => info!("Restored {} on {}", id, binding),
                Err(e) => {
                    warn!("Could not restart {} on {}: {}", id, binding, e);
                    failures.push(format!("restarting {} on {}: {}", id, binding, e));
                }
            }
        }

        if let Err(e) = self.core.persist().await {
            failures.push(format!("persisting restored routing: {}", e));
        }

        if !failures.is_empty() {
            return Err(self.core.halt(&cause, &failures));
        }

        self.core.record_error(&cause);
        self.core.emit(
            change.error_event(),
            json!({
                "error_kind": cause.kind(),
                "message": cause.to_string(),
                "state": self.core.snapshot().to_json(),
            }),
        );

        if let Some(id) = playing {
            self.core.watch_plugin(id);
        }
        Err(cause)
    }
}
