//! Source state machine
//!
//! `INACTIVE -> ACTIVATING -> CONNECTED`, `ACTIVATING -> ERROR` on timeout or
//! failure, and `CONNECTED -> DEACTIVATING -> INACTIVE` as the first half of a
//! switch. `transitioning` is set for the whole switch.
//!
//! An accepted request emits exactly one `system.transition_start` followed by
//! exactly one of `system.transition_complete`, `system.error`, or
//! `system.fatal`. Rejected requests emit nothing.

use std::sync::Arc;

use event_emitter::EventType;
use plugin_api::{PluginState, SourceId};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::{CoordinatorError, LastError, Result};
use crate::hub::{Deadline, HubCore};
use crate::routing::{device_binding, RoutingMode};
use crate::source::{parse_target, TransitionAttempt};

pub(crate) struct SourceStateMachine<'a> {
    core: &'a Arc<HubCore>,
}

fn label(source: Option<SourceId>) -> &'static str {
    source.map(|s| s.as_str()).unwrap_or("none")
}

impl<'a> SourceStateMachine<'a> {
    pub(crate) fn new(core: &'a Arc<HubCore>) -> Self {
        Self { core }
    }

    pub(crate) async fn request(&self, raw: &str) -> Result<()> {
        let target = parse_target(raw)?;
        if let Some(id) = target {
            self.core.plugin(id)?;
        }
        self.core.ensure_operational()?;

        if self.is_satisfied(target) {
            debug!("Source {} already active", label(target));
            return Ok(());
        }

        let _guard = self.core.begin_operation()?;
        self.core.ensure_operational()?;

        // Another operation may have finished between the check and the lock.
        if self.is_satisfied(target) {
            debug!("Source {} already active", label(target));
            if let Some(id) = target {
                self.core.watch_plugin(id);
            }
            return Ok(());
        }

        let (from_source, from_state) = self.core.read(|s| (s.active_source, s.plugin_state));
        let mut attempt = TransitionAttempt::new(
            from_source,
            from_state,
            target,
            Deadline::after(self.core.config.source_connect_timeout),
        );

        self.core.update(|s| s.transitioning = true);
        info!("Switching source {} -> {}", label(from_source), label(target));
        self.core.emit(
            EventType::TransitionStart,
            json!({ "from": from_source, "to": target }),
        );

        let result = match self.switch(&mut attempt).await {
            Ok(()) => self.commit(&attempt).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(cause) => self.roll_back(&attempt, cause).await,
        }
    }

    /// Already on `target` with nothing left to do
    fn is_satisfied(&self, target: Option<SourceId>) -> bool {
        self.core.read(|s| {
            !s.transitioning
                && s.active_source == target
                && (target.is_none() || s.plugin_state == PluginState::Connected)
        })
    }

    /// Deactivate the previous source, then activate the target
    async fn switch(&self, attempt: &mut TransitionAttempt) -> Result<()> {
        if let Some(from) = attempt.from_source {
            debug!("Deactivating {}", from);
            let budget = self.core.stop_budget(&attempt.deadline);
            self.core.deactivate(from, budget).await;
        }

        let Some(to) = attempt.to_source else {
            return Ok(());
        };

        let routing = self.core.read(|s| s.routing());
        if routing.mode == RoutingMode::Synchronized {
            attempt.retry_count += self.core.ensure_relay_running(&attempt.deadline).await?;
        }

        let binding = device_binding(to, &routing);
        self.core.activate(to, &binding, attempt.deadline).await
    }

    async fn commit(&self, attempt: &TransitionAttempt) -> Result<()> {
        let to = attempt.to_source;
        self.core.update(|s| {
            s.active_source = to;
            s.plugin_state = if to.is_some() {
                PluginState::Connected
            } else {
                PluginState::Inactive
            };
        });

        self.core.persist().await?;

        self.core.update(|s| s.transitioning = false);
        info!(
            "Source switch to {} complete ({} relay retries)",
            label(to),
            attempt.retry_count
        );
        self.core.emit(
            EventType::TransitionComplete,
            json!({
                "from": attempt.from_source,
                "to": to,
                "state": self.core.snapshot().to_json(),
            }),
        );

        if let Some(id) = to {
            self.core.watch_plugin(id);
        }
        Ok(())
    }

    /// Stop the target and return to the pre-attempt source
    ///
    /// A previous source that was playing is restarted on its original
    /// binding; if that fails the hub falls back to no active source.
    async fn roll_back(&self, attempt: &TransitionAttempt, cause: CoordinatorError) -> Result<()> {
        error!(
            "Source switch {} -> {} failed, rolling back: {}",
            label(attempt.from_source),
            label(attempt.to_source),
            cause
        );
        let cleanup = Deadline::after(self.core.config.source_connect_timeout);

        if let Some(to) = attempt.to_source {
            self.core.deactivate(to, self.core.stop_budget(&cleanup)).await;
        }

        let mut restored_source = attempt.from_source;
        let mut restored_state = if attempt.from_source.is_some() {
            attempt.from_state
        } else {
            PluginState::Inactive
        };

        if let Some(from) = attempt.from_source.filter(|_| attempt.from_was_playing()) {
            let binding = device_binding(from, &self.core.read(|s| s.routing()));
            match self.core.activate(from, &binding, cleanup).await {
                Ok(()) => {
                    info!("Restored {} on {}", from, binding);
                    restored_state = PluginState::Connected;
                }
                Err(e) => {
                    warn!("Could not restart {}, falling back to none: {}", from, e);
                    self.core.deactivate(from, self.core.stop_budget(&cleanup)).await;
                    restored_source = None;
                    restored_state = PluginState::Inactive;
                }
            }
        }

        self.core.update(|s| {
            s.active_source = restored_source;
            s.plugin_state = restored_state;
            s.transitioning = false;
            s.last_error = Some(LastError::from(&cause));
        });

        if let Err(e) = self.core.persist().await {
            let failure = format!("persisting restored source {}: {}", label(restored_source), e);
            return Err(self.core.halt(&cause, &[failure]));
        }

        self.core.emit(
            EventType::Error,
            json!({
                "error_kind": cause.kind(),
                "message": cause.to_string(),
                "from": attempt.from_source,
                "to": attempt.to_source,
                "state": self.core.snapshot().to_json(),
            }),
        );

        if let (Some(id), PluginState::Connected) = (restored_source, restored_state) {
            self.core.watch_plugin(id);
        }
        Err(cause)
    }
}
