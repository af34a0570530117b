use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sensorstream::broker::Broker;
use sensorstream::config::Config;
use sensorstream::logging::init_logging;
use sensorstream::metrics::{start_metrics_server, MetricsConfig};
use sensorstream::protocol::PublisherId;
use sensorstream::sensor::Sensor;
use sensorstream::transport::MemoryBus;
use sensorstream::validator::Validator;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "sensorstream",
    version,
    about = "Sensor streaming with multi-broker gap recovery"
)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true, env = "SENSORSTREAM_JSON_LOGS")]
    json_logs: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run sensors, brokers and a late-joining validator on an in-process bus
    Simulate(SimulateArgs),

    /// Print the effective configuration as TOML
    Config {
        #[arg(long, env = "SENSORSTREAM_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Path to a TOML config file
    #[arg(long, env = "SENSORSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Number of broker nodes
    #[arg(long, default_value_t = 2)]
    brokers: usize,

    /// Number of sensors
    #[arg(long, default_value_t = 3)]
    sensors: usize,

    /// Seconds before the validator joins and starts recovery
    #[arg(long, default_value_t = 10)]
    validator_delay_secs: u64,

    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Seconds between summary logs
    #[arg(long, default_value_t = 10)]
    summary_every_secs: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs, cli.log_filter.as_deref())?;

    match cli.command {
        Command::Simulate(args) => simulate(args).await,
        Command::Config { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

async fn simulate(args: SimulateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;

    if let Some(addr) = args.metrics_addr {
        start_metrics_server(MetricsConfig::with_addr(addr))?;
        info!(%addr, "Metrics exporter listening");
    }

    let broker_ids: Vec<PublisherId> = (0..args.brokers)
        .map(|i| PublisherId::new(format!("broker-{i}")))
        .collect();
    if config.recovery.known_brokers.is_empty() {
        config.recovery.known_brokers = broker_ids.clone();
    }

    let bus = MemoryBus::new();
    let topics = config.topics.clone();

    let mut brokers = Vec::with_capacity(broker_ids.len());
    for id in &broker_ids {
        let broker = Broker::new(
            Arc::new(bus.client(id.clone())),
            topics.clone(),
            config.broker(),
        )
        .with_context(|| format!("creating {id}"))?;
        broker.start().await?;
        brokers.push(broker);
    }

    let mut sensors = Vec::with_capacity(args.sensors);
    for i in 0..args.sensors {
        let id = format!("sensor-{i}");
        let sensor = Sensor::new(
            id.clone(),
            Arc::new(bus.client(id.as_str())),
            topics.clone(),
            config.sensor.clone(),
        )?;
        sensor.start().await;
        sensors.push(sensor);
    }

    info!(
        brokers = brokers.len(),
        sensors = sensors.len(),
        validator_delay_secs = args.validator_delay_secs,
        "Simulation started"
    );

    let deadline = args
        .duration_secs
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    let validator = Validator::new(
        Arc::new(bus.client("validator")),
        topics,
        config.validator.clone(),
        config.recovery.clone(),
    );

    let joined = tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.validator_delay_secs)) => true,
        _ = sleep_until(deadline) => false,
        _ = tokio::signal::ctrl_c() => false,
    };

    if joined {
        validator.start().await?;

        let mut summary = tokio::time::interval(Duration::from_secs(args.summary_every_secs.max(1)));
        summary.tick().await;
        loop {
            tokio::select! {
                _ = summary.tick() => {
                    info!(summary = %validator.summary(), "Validator");
                    for broker in &brokers {
                        info!(broker = %broker.id(), stats = %broker.stats(), "Broker");
                    }
                }
                _ = sleep_until(deadline) => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    info!("Shutting down");
    validator.stop().await;
    for sensor in &sensors {
        sensor.stop().await;
    }
    for broker in &brokers {
        broker.stop().await;
    }

    info!(summary = %validator.summary(), "Final validator summary");
    for broker in &brokers {
        info!(broker = %broker.id(), stats = %broker.stats(), "Final broker stats");
    }
    let bus_stats = bus.stats();
    info!(
        published = bus_stats.published,
        delivered = bus_stats.delivered,
        "Bus totals"
    );
    bus.close();

    Ok(())
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
