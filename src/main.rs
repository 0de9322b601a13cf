//! system2mqtt - main entry point

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use system2mqtt::broker::{BrokerConnection, BrokerHandle};
use system2mqtt::config::S2mConfig;
use system2mqtt::control::{register_control_handlers, SystemPowerControl};
use system2mqtt::discovery::DiscoveryContext;
use system2mqtt::metrics::{MetricSource, ProxmoxMetrics, SystemMetrics};
use system2mqtt::observability::init_default_logging;
use system2mqtt::publishers::standard_jobs;
use system2mqtt::scheduler::{PublishScheduler, SchedulerState};
use system2mqtt::transport::mqtt::{ConnectionConfig, LivenessConfig, MqttTransport};
use tokio::{
    signal,
    time::{sleep, Duration},
};
use tracing::{error, info, warn};

/// Default configuration locations, in search order
const DEFAULT_CONFIG_PATHS: &[&str] = &["s2m.toml", "config/s2m.toml", "/etc/system2mqtt/s2m.toml"];

/// How long the event loop gets to flush the final publishes on exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Publish host metrics to an MQTT broker
#[derive(Parser)]
#[command(name = "s2m")]
#[command(about = "Publish host metrics to an MQTT broker with Home Assistant discovery")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and publish until quit
    Run,
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(cli.verbose);

    info!("Starting system2mqtt v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<S2mConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(S2mConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(S2mConfig::load_from_file(path)?);
        }
    }

    Err(format!(
        "No configuration file found. Provide one with -c/--config or create one of: {}",
        DEFAULT_CONFIG_PATHS.join(", ")
    )
    .into())
}

fn build_metric_source(
    config: &S2mConfig,
) -> Result<Arc<dyn MetricSource>, Box<dyn std::error::Error>> {
    let local = SystemMetrics::new(config.storage.clone(), &config.hardware);

    match &config.hypervisor {
        Some(section) => {
            info!("Hypervisor mode: node '{}' at {}", section.node, section.url);
            let password = config.get_hypervisor_password()?;
            let metrics = ProxmoxMetrics::new(section, password, config.storage.clone(), local)?;
            Ok(Arc::new(metrics))
        }
        None => Ok(Arc::new(local)),
    }
}

async fn run(config: S2mConfig) -> Result<(), Box<dyn std::error::Error>> {
    let base_topic = config.base_topic();
    let computer_name = config.computer_name();
    info!("Computer name: {}, base topic: {}", computer_name, base_topic);

    let connection = ConnectionConfig::from_config(&config)?;
    let liveness = LivenessConfig::for_base(&base_topic);
    let broker = Arc::new(BrokerConnection::configure(&connection, Some(liveness.clone())));

    let state = Arc::new(SchedulerState::new(config.publish.interval_secs));
    register_control_handlers(&broker, &base_topic, &state, Arc::new(SystemPowerControl));
    broker.on_connected(|| info!("Connected, control topics are live"));

    let metrics = build_metric_source(&config)?;
    let handle: Arc<dyn BrokerHandle> = broker.clone();
    let mut scheduler = PublishScheduler::new(handle, metrics, Arc::clone(&state), &base_topic)
        .with_jobs(standard_jobs(
            Some(liveness.online.as_str()),
            config.hardware.any_enabled(),
        ));
    if config.discovery.enabled {
        scheduler = scheduler.with_discovery(DiscoveryContext::new(
            &config.discovery.prefix,
            &computer_name,
            Some(liveness.topic.clone()),
        ));
    }

    info!("Publish jobs: {}", scheduler.job_names().join(", "));

    broker.start()?;
    // Give the first CONNACK a moment before the scheduler starts polling
    sleep(Duration::from_secs(1)).await;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = scheduler.run() => {
            info!("Publish loop finished");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            shutdown(broker.as_ref(), &state, &liveness);
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            shutdown(broker.as_ref(), &state, &liveness);
        }
    }

    if !broker.transport().wait_stopped(SHUTDOWN_TIMEOUT).await {
        warn!("MQTT event loop did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }
    Ok(())
}

/// Announce offline and disconnect cleanly
fn shutdown(
    broker: &BrokerConnection<MqttTransport>,
    state: &SchedulerState,
    liveness: &LivenessConfig,
) {
    state.disable_auto_reconnect();
    if let Err(e) = broker.publish_liveness(&liveness.offline) {
        warn!("Failed to publish offline liveness: {}", e);
    }
    if let Err(e) = broker.stop() {
        error!("Error during shutdown: {}", e);
    }
}

fn handle_config_command(config: &S2mConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("# computer name: {}", config.computer_name());
        println!("# base topic: {}", config.base_topic());
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
