//! WolfElect - ZooKeeper-Backed Leader Election Gate
//!
//! Registers an ephemeral candidate node with the coordination service,
//! waits until this process owns the smallest sequence number, and only
//! then starts serving HTTP traffic.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::api::HttpServer;
use wolfelect::config::WolfElectConfig;
use wolfelect::coordination::CoordinationSession;
use wolfelect::election::{CandidateHandle, LeaderElector, LeadershipGate, RetryPolicy};
use wolfelect::error::Result;
use wolfelect::shutdown::ShutdownCoordinator;

/// WolfElect - ZooKeeper-Backed Leader Election Gate
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (environment variables override it)
    #[arg(short, long, default_value = "wolfelect.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WolfElect node
    Start,

    /// Query a node's status endpoint
    Status {
        /// Node address to query (defaults to localhost)
        #[arg(short, long, default_value = "localhost:5000")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfelect.toml")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Start => run_start(cli.config).await,
        Commands::Status { address } => run_status(address).await,
        Commands::Init { output } => run_init(output),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load config from the file when present, otherwise from environment
/// variables and defaults alone
fn load_config(path: &std::path::Path) -> Result<WolfElectConfig> {
    if path.exists() {
        let config = WolfElectConfig::from_file(path)?;
        tracing::info!("loaded configuration from {:?}", path);
        Ok(config)
    } else {
        tracing::info!("no config file at {:?}, using environment and defaults", path);
        WolfElectConfig::from_env()
    }
}

/// Start the WolfElect node
async fn run_start(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    tracing::info!(
        "starting wolfelect (coordinator {}, election path {})",
        config.coordinator_address(),
        config.election.path
    );

    let gate = Arc::new(LeadershipGate::new());
    let candidate: CandidateHandle = Arc::new(RwLock::new(None));
    let (watch_tx, watch_rx) = mpsc::channel(32);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Initial connectivity failure is fatal to this election attempt: the
    // process stays up gated, never serving, until terminated
    let session = match CoordinationSession::connect(
        config.coordinator.clone(),
        config.election.path.clone(),
        watch_tx,
    )
    .await
    {
        Ok(session) => Some(Arc::new(session)),
        Err(e) => {
            tracing::error!("unable to reach coordination service: {}", e);
            None
        }
    };

    if let Some(session) = &session {
        let retry = RetryPolicy::new(
            config.retry_interval(),
            Some(Duration::from_millis(config.election.retry_jitter_ms)),
        );
        let mut elector = LeaderElector::new(
            Arc::clone(session),
            Arc::clone(&gate),
            Arc::clone(&candidate),
            config.election.path.clone(),
            retry,
            watch_rx,
            shutdown_rx.clone(),
        );
        tokio::spawn(async move {
            elector.run().await;
        });
    }

    let shutdown = ShutdownCoordinator::new(
        session,
        Arc::clone(&candidate),
        shutdown_tx,
        config.shutdown_grace(),
    );
    let shutdown_task = tokio::spawn(shutdown.run());

    // Startup sequencer: only bind the listener once leadership is held
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if gate.is_leader() {
                    break;
                }
                tracing::debug!("waiting to become leader");
            }
            _ = shutdown_rx.changed() => {
                let _ = shutdown_task.await;
                tracing::info!("wolfelect shutdown complete");
                return Ok(());
            }
        }
    }

    tracing::info!("starting HTTP endpoint as leader");
    let http_server = HttpServer::new(
        config.api.clone(),
        Arc::clone(&gate),
        Arc::clone(&candidate),
    );

    tokio::select! {
        result = http_server.start() => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
            shutdown_task.abort();
        }
        _ = shutdown_rx.changed() => {
            let _ = shutdown_task.await;
        }
    }

    tracing::info!("wolfelect shutdown complete");
    Ok(())
}

/// Query a node's status endpoint
async fn run_status(address: String) -> Result<()> {
    let url = format!("http://{}/status", address);

    match reqwest::get(&url).await {
        Ok(response) => {
            let status: serde_json::Value = response
                .json()
                .await
                .map_err(|e| wolfelect::Error::Network(e.to_string()))?;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to get status: {}", e);
            Err(wolfelect::Error::Network(e.to_string()))
        }
    }
}

/// Initialize configuration file
fn run_init(output: PathBuf) -> Result<()> {
    let config_content = r#"# WolfElect Configuration
# Generated configuration file
#
# Environment overrides: ZK_HOST, ZK_PORT, ELECTION_PATH, PORT,
# CONNECT_TIMEOUT_SECS, RETRY_INTERVAL_SECS

[coordinator]
host = "zookeeper-headless"
port = 2181
connect_timeout_secs = 5
session_timeout_ms = 10000

[election]
path = "/api-leader"
retry_interval_secs = 5
retry_jitter_ms = 0
shutdown_grace_secs = 5

[api]
enabled = true
bind_address = "0.0.0.0:5000"

[logging]
level = "info"
format = "pretty"
"#;

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to point at your ZooKeeper ensemble.");
    println!("Then start with: wolfelect start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfElectConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Coordinator:    {}", config.coordinator_address());
            println!("  Election Path:  {}", config.election.path);
            println!("  API Address:    {}", config.api.bind_address);
            println!("  Retry Interval: {} s", config.election.retry_interval_secs);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
