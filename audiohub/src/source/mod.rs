//! Source selection
//!
//! Parsing of requested source identifiers and the bookkeeping for one source
//! switch. The switch itself is driven by [`machine::SourceStateMachine`].

pub(crate) mod machine;

use plugin_api::{PluginState, SourceId};

use crate::error::CoordinatorError;
use crate::hub::Deadline;

/// Identifier that requests no active source
pub const NONE_SENTINEL: &str = "none";

/// Parse a requested target: a known source identifier or `"none"`
pub fn parse_target(raw: &str) -> Result<Option<SourceId>, CoordinatorError> {
    if raw == NONE_SENTINEL {
        return Ok(None);
    }
    raw.parse::<SourceId>()
        .map(Some)
        .map_err(|_| CoordinatorError::UnknownSource(raw.to_string()))
}

/// One accepted source switch; never persisted
#[derive(Debug, Clone)]
pub(crate) struct TransitionAttempt {
    pub from_source: Option<SourceId>,
    /// Plugin state of `from_source` when the attempt began
    pub from_state: PluginState,
    pub to_source: Option<SourceId>,
    pub deadline: Deadline,
    /// Relay unit retries spent so far
    pub retry_count: u32,
}

impl TransitionAttempt {
    pub fn new(
        from_source: Option<SourceId>,
        from_state: PluginState,
        to_source: Option<SourceId>,
        deadline: Deadline,
    ) -> Self {
        Self {
            from_source,
            from_state,
            to_source,
            deadline,
            retry_count: 0,
        }
    }

    /// Whether the previous source was producing audio before the attempt
    pub fn from_was_playing(&self) -> bool {
        self.from_source.is_some() && self.from_state == PluginState::Connected
    }
}
