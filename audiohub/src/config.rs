//! Hub configuration
//!
//! Timeouts, retry constants, the persisted document location, and the relay
//! units toggled by routing changes. Nothing here is read from disk; the CLI
//! maps its flags onto a [`HubConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use event_emitter::DEFAULT_BUFFER_SIZE;

use crate::error::{CoordinatorError, Result};
use crate::retry::RetryPolicy;

/// Units that carry the synchronized output, in start order
pub const DEFAULT_RELAY_UNITS: [&str; 2] = ["snapserver.service", "snapclient.service"];

/// Configuration for an [`AudioHub`](crate::AudioHub)
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Live persisted document; backups sit next to it
    pub config_path: PathBuf,
    /// Number of prior documents kept as `<file>.bak.N`
    pub backup_depth: usize,
    /// Deadline for a source switch, measured from the request
    pub source_connect_timeout: Duration,
    /// Deadline for a routing change, measured from the request
    pub routing_transition_timeout: Duration,
    pub retry: RetryPolicy,
    /// Started in order when entering synchronized mode, stopped in reverse
    pub relay_units: Vec<String>,
    pub event_buffer_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            backup_depth: 3,
            source_connect_timeout: Duration::from_secs(10),
            routing_transition_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            relay_units: DEFAULT_RELAY_UNITS.iter().map(|s| s.to_string()).collect(),
            event_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// `<config dir>/audiohub/config.json`, or `./audiohub.json` when the
/// platform has no config directory
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("audiohub").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("audiohub.json"))
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the document stored at `path`
    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self::default().with_config_path(path)
    }

    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_backup_depth(mut self, depth: usize) -> Self {
        self.backup_depth = depth;
        self
    }

    pub fn with_source_connect_timeout(mut self, timeout: Duration) -> Self {
        self.source_connect_timeout = timeout;
        self
    }

    pub fn with_routing_transition_timeout(mut self, timeout: Duration) -> Self {
        self.routing_transition_timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_relay_units<I, S>(mut self, units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relay_units = units.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.source_connect_timeout.is_zero() {
            return Err(invalid("source_connect_timeout must be greater than zero"));
        }
        if self.routing_transition_timeout.is_zero() {
            return Err(invalid("routing_transition_timeout must be greater than zero"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.attempt_timeout.is_zero() {
            return Err(invalid("retry.attempt_timeout must be greater than zero"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid("retry.base_delay must not exceed retry.max_delay"));
        }
        if self.event_buffer_size == 0 {
            return Err(invalid("event_buffer_size must be greater than zero"));
        }
        if self.relay_units.iter().any(|unit| unit.trim().is_empty()) {
            return Err(invalid("relay_units must not contain empty names"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> CoordinatorError {
    CoordinatorError::InvalidConfig(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.backup_depth, 3);
        assert_eq!(config.source_connect_timeout, Duration::from_secs(10));
        assert_eq!(config.routing_transition_timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.relay_units, vec!["snapserver.service", "snapclient.service"]);
        assert_eq!(config.event_buffer_size, 256);
        assert!(config.config_path.ends_with("config.json") || config.config_path.ends_with("audiohub.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = HubConfig::for_path("/tmp/hub/config.json")
            .with_backup_depth(5)
            .with_source_connect_timeout(Duration::from_secs(3))
            .with_relay_units(["relay.service"]);

        assert_eq!(config.config_path, PathBuf::from("/tmp/hub/config.json"));
        assert_eq!(config.backup_depth, 5);
        assert_eq!(config.source_connect_timeout, Duration::from_secs(3));
        assert_eq!(config.relay_units, vec!["relay.service".to_string()]);
    }

    #[rstest]
    #[case(HubConfig::default().with_source_connect_timeout(Duration::ZERO))]
    #[case(HubConfig::default().with_routing_transition_timeout(Duration::ZERO))]
    #[case(HubConfig::default().with_retry_policy(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }))]
    #[case(HubConfig::default().with_retry_policy(RetryPolicy { attempt_timeout: Duration::ZERO, ..RetryPolicy::default() }))]
    #[case(HubConfig::default().with_retry_policy(RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(1))))]
    #[case(HubConfig::default().with_event_buffer_size(0))]
    #[case(HubConfig::default().with_relay_units([" "]))]
    fn test_validate_rejects(#[case] config: HubConfig) {
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert!(matches!(err, CoordinatorError::InvalidConfig(_)));
    }
}
