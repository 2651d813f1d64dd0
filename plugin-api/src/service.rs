use std::time::Duration;

use async_trait::async_trait;

use crate::error::ServiceError;

/// Single-attempt control over OS service units
///
/// Each call makes exactly one attempt and must give up once `timeout` has
/// elapsed. Retries and backoff are the caller's concern.
#[async_trait]
pub trait ServiceController: Send + Sync {
    /// Start `name`, returning once the service manager reports success
    async fn start_unit(&self, name: &str, timeout: Duration) -> Result<(), ServiceError>;

    /// Stop `name`
    async fn stop_unit(&self, name: &str, timeout: Duration) -> Result<(), ServiceError>;

    /// Whether `name` is currently running. Query failures count as not running.
    async fn is_active(&self, name: &str) -> bool;
}
