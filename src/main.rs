//! Device agent - main entry point
//!
//! Loads the configuration, wires the host capabilities into a
//! [`DeviceAgent`] and runs it until interrupted.

use clap::{Parser, Subcommand};
use device_agent::agent::DeviceAgent;
use device_agent::config::AgentConfig;
use device_agent::hardware::LogPinDriver;
use device_agent::link::HostNetwork;
use device_agent::observability::{init_default_logging, metrics};
use device_agent::transport::mqtt::MqttMessaging;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info};

/// Interval between metric snapshots in the debug log
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Connectivity supervisor and telemetry agent
#[derive(Parser)]
#[command(name = "device-agent")]
#[command(about = "Connectivity supervisor and telemetry agent for MQTT-attached devices")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DEVICE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run,
    /// Validate the configuration
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting device agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AgentConfig::load_from_file(path)?);
    }

    let default_paths = ["agent.toml", "config/agent.toml", "/etc/device-agent/agent.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AgentConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create agent.toml".into())
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(device_id = %config.device.id, ssid = %config.link.ssid, "Preparing device agent");

    let network = Arc::new(HostNetwork::from_config(&config)?);
    let messaging = Arc::new(MqttMessaging::new());
    let pins = Arc::new(LogPinDriver::new());

    let mut agent = DeviceAgent::new(config, network, messaging, pins)?;
    agent.start().await?;

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut metrics_ticker = tokio::time::interval(METRICS_LOG_INTERVAL);

    info!("Device agent running");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            _ = metrics_ticker.tick() => log_metrics(),
        }
    }

    agent.shutdown().await?;
    log_metrics();
    Ok(())
}

fn log_metrics() {
    match serde_json::to_string(&metrics().get_metrics()) {
        Ok(snapshot) => debug!(%snapshot, "Metrics snapshot"),
        Err(e) => debug!(error = %e, "Failed to serialize metrics"),
    }
}

fn handle_config_command(config: &AgentConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(
        device_id = %config.device.id,
        producers = config.telemetry.len(),
        actuator = config.actuator.is_some(),
        "Configuration validation complete"
    );
    Ok(())
}
