use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use audiohub::logging::{self, LoggingMode};
use audiohub::{
    default_config_path, AudioHub, HubConfig, Outcome, RetryPolicy, RoutingMode, ServiceController,
    SourceId, SystemctlController,
};
use plugin_api::testing::{ConnectBehavior, SimulatedPlugin, SimulatedServiceController};
use serde_json::json;

pub mod commands;

use commands::{parse_line, Command, HELP};

/// Audio hub driver
///
/// Runs the coordinator against simulated source plugins and reads commands
/// from stdin. Lifecycle events are printed as JSON lines on stdout.
#[derive(Parser, Debug)]
#[command(name = "audiohub")]
#[command(about = "Audio hub coordinator - interactive driver")]
#[command(version)]
pub struct Args {
    /// Path of the persisted configuration document
    #[arg(short, long, env = "AUDIOHUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of rotated backups kept next to the document
    #[arg(long, default_value = "3")]
    pub backup_depth: usize,

    /// Source switch deadline in seconds
    #[arg(long, default_value = "10")]
    pub connect_timeout: u64,

    /// Routing change deadline in seconds
    #[arg(long, default_value = "15")]
    pub routing_timeout: u64,

    /// Maximum attempts per relay unit call
    #[arg(short = 'r', long, default_value = "3")]
    pub retry_attempts: u32,

    /// First backoff delay in milliseconds
    #[arg(long, default_value = "200")]
    pub retry_base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[arg(long, default_value = "2000")]
    pub retry_max_delay_ms: u64,

    /// Timeout of a single relay unit call in milliseconds
    #[arg(long, default_value = "2000")]
    pub attempt_timeout_ms: u64,

    /// Relay unit started for synchronized playback, in start order (repeatable)
    #[arg(long = "relay-unit")]
    pub relay_units: Vec<String>,

    /// Drive relay units through systemctl instead of the in-memory simulator
    #[arg(long)]
    pub systemd: bool,

    /// Pass --user to systemctl
    #[arg(long, requires = "systemd")]
    pub user_units: bool,

    /// Delay before a simulated source reports connected, in milliseconds
    #[arg(long, default_value = "250")]
    pub connect_delay_ms: u64,

    /// Log output (silent, development, debug, json)
    #[arg(long, env = "AUDIOHUB_LOG_MODE", default_value = "development")]
    pub log_mode: String,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == 0 {
            return Err(anyhow::anyhow!("Connect timeout must be positive"));
        }

        if self.routing_timeout == 0 {
            return Err(anyhow::anyhow!("Routing timeout must be positive"));
        }

        if self.retry_attempts == 0 {
            return Err(anyhow::anyhow!("Retry attempts must be at least 1"));
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow::anyhow!(
                "Invalid backoff: base delay ({}ms) > max delay ({}ms)",
                self.retry_base_delay_ms,
                self.retry_max_delay_ms
            ));
        }

        self.log_mode()?;
        Ok(())
    }

    pub fn log_mode(&self) -> Result<LoggingMode> {
        self.log_mode
            .parse()
            .with_context(|| format!("Invalid log mode '{}'", self.log_mode))
    }

    /// Build the coordinator configuration
    pub fn to_config(&self) -> HubConfig {
        let retry = RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
        .with_attempt_timeout(Duration::from_millis(self.attempt_timeout_ms));

        let path = self.config.clone().unwrap_or_else(default_config_path);
        let mut config = HubConfig::for_path(path)
            .with_backup_depth(self.backup_depth)
            .with_source_connect_timeout(Duration::from_secs(self.connect_timeout))
            .with_routing_transition_timeout(Duration::from_secs(self.routing_timeout))
            .with_retry_policy(retry);

        if !self.relay_units.is_empty() {
            config = config.with_relay_units(self.relay_units.iter().cloned());
        }
        config
    }

    fn connect_behavior(&self) -> ConnectBehavior {
        match self.connect_delay_ms {
            0 => ConnectBehavior::Immediate,
            ms => ConnectBehavior::After(Duration::from_millis(ms)),
        }
    }

    fn service_controller(&self) -> Arc<dyn ServiceController> {
        if self.systemd {
            Arc::new(SystemctlController::new().user_scope(self.user_units))
        } else {
            Arc::new(SimulatedServiceController::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate().context("Invalid command line arguments")?;

    logging::init_logging(args.log_mode()?).context("Failed to initialize logging")?;

    let config = args.to_config();
    info!(path = %config.config_path.display(), "Starting audio hub");

    let behavior = args.connect_behavior();
    let mut builder = AudioHub::builder()
        .with_config(config)
        .with_service_controller(args.service_controller());
    for id in SourceId::ALL {
        builder = builder.register_plugin(Arc::new(SimulatedPlugin::with_behavior(id, behavior)));
    }

    let hub = builder.start().await.context("Failed to start audio hub")?;
    info!(
        path = %hub.config_store().path().display(),
        backups = hub.config_store().backup_depth(),
        "Configuration loaded"
    );

    let mut events = hub.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            }
        }
    });

    println!("{}", HELP);
    let result = tokio::select! {
        result = run_commands(&hub) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    hub.shutdown().await;
    printer.abort();

    if let Err(e) = &result {
        error!(error = %e, "Driver stopped with an error");
    }
    result
}

/// Read commands from stdin until EOF or `quit`
async fn run_commands(hub: &AudioHub) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let outcome = match command {
            Command::Source(id) => Outcome::from(hub.request_source(&id).await),
            Command::Routing(mode) => match mode.parse::<RoutingMode>() {
                Ok(mode) => Outcome::from(hub.set_routing_mode(mode).await),
                Err(e) => Outcome::from(&e),
            },
            Command::Equalizer(enabled) => Outcome::from(hub.set_equalizer(enabled).await),
            Command::Reset => Outcome::from(hub.reset().await),
            Command::State => {
                let state = hub.get_state();
                let mut report = state.to_json();
                report["binding"] = json!(state.binding());
                println!("{}", report);
                continue;
            }
            Command::Help => {
                println!("{}", HELP);
                continue;
            }
            Command::Quit => break,
        };

        println!("{}", serde_json::to_string(&outcome)?);
    }

    Ok(())
}
