//! `systemctl`-backed service controller
//!
//! Each call spawns one `systemctl` process and waits for it under the given
//! timeout. The child is killed if the timeout elapses.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ServiceError;
use crate::service::ServiceController;

/// Timeout for `is-active` queries, which have no caller-supplied bound
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// [`ServiceController`] that shells out to `systemctl`
#[derive(Debug, Clone)]
pub struct SystemctlController {
    program: PathBuf,
    user_scope: bool,
}

impl Default for SystemctlController {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemctlController {
    /// Control system units with the `systemctl` found on `PATH`
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            user_scope: false,
        }
    }

    /// Use a specific `systemctl` binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Control the user's service manager (`systemctl --user`)
    pub fn user_scope(mut self, enabled: bool) -> Self {
        self.user_scope = enabled;
        self
    }

    fn command(&self, verb: &str, unit: &str) -> Command {
        let mut command = Command::new(&self.program);
        if self.user_scope {
            command.arg("--user");
        }
        command
            .arg(verb)
            .arg(unit)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    async fn run(
        &self,
        action: &'static str,
        unit: &str,
        timeout: Duration,
    ) -> Result<(), ServiceError> {
        tracing::debug!("systemctl {} {}", action, unit);

        let child = self
            .command(action, unit)
            .spawn()
            .map_err(|source| ServiceError::Spawn {
                action,
                unit: unit.to_string(),
                source,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ServiceError::Spawn {
                    action,
                    unit: unit.to_string(),
                    source,
                })
            }
            // Dropping the future drops the child, and kill_on_drop reaps it.
            Err(_) => {
                return Err(ServiceError::Timeout {
                    action,
                    unit: unit.to_string(),
                    timeout,
                })
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(ServiceError::CommandFailed {
                action,
                unit: unit.to_string(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl ServiceController for SystemctlController {
    async fn start_unit(&self, name: &str, timeout: Duration) -> Result<(), ServiceError> {
        self.run("start", name, timeout).await
    }

    async fn stop_unit(&self, name: &str, timeout: Duration) -> Result<(), ServiceError> {
        self.run("stop", name, timeout).await
    }

    async fn is_active(&self, name: &str) -> bool {
        match self.run("is-active", name, QUERY_TIMEOUT).await {
            Ok(()) => true,
            Err(ServiceError::CommandFailed { .. }) => false,
            Err(e) => {
                tracing::warn!("Failed to query {}: {}", name, e);
                false
            }
        }
    }
}
