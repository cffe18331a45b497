//! ttybridge Daemon
//!
//! Bridges WebSocket clients to local PTY shell sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use daemon::config::Config;
use daemon::server::EventServer;
use daemon::session::SessionRegistry;

/// ttybridge daemon - interactive shells over a WebSocket event channel.
#[derive(Parser, Debug)]
#[command(name = "ttybridge-daemon")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Listen address override (e.g. 127.0.0.1:8022)
    #[arg(short, long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // CLI flags win over file and environment
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("ttybridge daemon starting...");

    // Validate configuration
    config.validate()?;

    // Session registry with its background sweeper
    let registry = Arc::new(SessionRegistry::new(config.terminal.clone()));
    registry.start_sweeper(Duration::from_secs(config.terminal.sweep_interval_secs));

    // Event server
    let server = EventServer::bind(&config.server.listen_addr, Arc::clone(&registry)).await?;
    let shutdown = server.shutdown_token();
    let server_handle = tokio::spawn(server.run());

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received ctrl-c, shutting down");

    shutdown.cancel();
    let _ = server_handle.await;

    // Drain every remaining session before exiting
    registry.shutdown().await;

    tracing::info!("ttybridge daemon stopped");
    Ok(())
}
