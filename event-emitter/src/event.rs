//! Event record types
//!
//! Every record serializes to the wire shape consumed by the transport layer:
//!
//! ```json
//! { "sequence": 7, "category": "routing", "type": "multiroom_ready",
//!   "data": { ... }, "timestamp": "2026-10-15T09:12:44.120Z" }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level grouping of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    System,
    Routing,
    Source,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::System => "system",
            EventCategory::Routing => "routing",
            EventCategory::Source => "source",
        }
    }
}

/// Event type; each type belongs to exactly one [`EventCategory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // system
    TransitionStart,
    TransitionComplete,
    Error,
    Warning,
    /// A rollback failed; the hub refuses operations until reset
    Fatal,
    Reset,

    // routing
    MultiroomEnabling,
    MultiroomDisabling,
    MultiroomReady,
    MultiroomError,
    EqualizerEnabling,
    EqualizerDisabling,
    EqualizerReady,
    EqualizerError,

    // source
    StatusChanged,
}

impl EventType {
    pub fn category(&self) -> EventCategory {
        match self {
            EventType::TransitionStart
            | EventType::TransitionComplete
            | EventType::Error
            | EventType::Warning
            | EventType::Fatal
            | EventType::Reset => EventCategory::System,

            EventType::MultiroomEnabling
            | EventType::MultiroomDisabling
            | EventType::MultiroomReady
            | EventType::MultiroomError
            | EventType::EqualizerEnabling
            | EventType::EqualizerDisabling
            | EventType::EqualizerReady
            | EventType::EqualizerError => EventCategory::Routing,

            EventType::StatusChanged => EventCategory::Source,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TransitionStart => "transition_start",
            EventType::TransitionComplete => "transition_complete",
            EventType::Error => "error",
            EventType::Warning => "warning",
            EventType::Fatal => "fatal",
            EventType::Reset => "reset",
            EventType::MultiroomEnabling => "multiroom_enabling",
            EventType::MultiroomDisabling => "multiroom_disabling",
            EventType::MultiroomReady => "multiroom_ready",
            EventType::MultiroomError => "multiroom_error",
            EventType::EqualizerEnabling => "equalizer_enabling",
            EventType::EqualizerDisabling => "equalizer_disabling",
            EventType::EqualizerReady => "equalizer_ready",
            EventType::EqualizerError => "equalizer_error",
            EventType::StatusChanged => "status_changed",
        }
    }

    /// Whether this type ends an operation in failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventType::Error
                | EventType::Fatal
                | EventType::MultiroomError
                | EventType::EqualizerError
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category().as_str(), self.as_str())
    }
}

/// One emitted lifecycle record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the emitter's total order, starting at 1
    pub sequence: u64,
    pub category: EventCategory,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// `category.type`, e.g. `system.transition_start`
    pub fn name(&self) -> String {
        self.event_type.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = Event {
            sequence: 3,
            category: EventType::MultiroomReady.category(),
            event_type: EventType::MultiroomReady,
            data: json!({ "routing_mode": "synchronized" }),
            timestamp: DateTime::parse_from_rfc3339("2026-10-15T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["category"], "routing");
        assert_eq!(wire["type"], "multiroom_ready");
        assert_eq!(wire["sequence"], 3);
        assert_eq!(wire["data"]["routing_mode"], "synchronized");
        assert_eq!(wire["timestamp"], "2026-10-15T09:00:00Z");
    }

    #[test]
    fn test_serde_names_match_as_str() {
        let all = [
            EventType::TransitionStart,
            EventType::TransitionComplete,
            EventType::Error,
            EventType::Warning,
            EventType::Fatal,
            EventType::Reset,
            EventType::MultiroomEnabling,
            EventType::MultiroomDisabling,
            EventType::MultiroomReady,
            EventType::MultiroomError,
            EventType::EqualizerEnabling,
            EventType::EqualizerDisabling,
            EventType::EqualizerReady,
            EventType::EqualizerError,
            EventType::StatusChanged,
        ];
        for event_type in all {
            assert_eq!(
                serde_json::to_value(event_type).unwrap(),
                json!(event_type.as_str())
            );
        }
    }

    #[test]
    fn test_display_includes_category() {
        assert_eq!(EventType::Error.to_string(), "system.error");
        assert_eq!(EventType::EqualizerEnabling.to_string(), "routing.equalizer_enabling");
        assert_eq!(EventType::StatusChanged.to_string(), "source.status_changed");
    }
}
