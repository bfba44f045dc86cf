//! BindSync - cross-platform chat relay with reply threading
//!
//! Relays messages between Telegram, Discord and Slack and serves the REST
//! API that injects messages into all three.

use anyhow::{Context, Result};
use bindsync::{bridge::Bridge, config::BridgeConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bindsync")]
#[command(version)]
#[command(about = "Cross-platform chat relay for Telegram, Discord and Slack")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BINDSYNC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay and the REST API
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },

    /// Validate configuration and exit
    Check,
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bindsync={},tower_http={}", log_level, log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = BridgeConfig::load(cli.config.as_deref())?;
            if let Some(host) = host {
                config.api.host = host;
            }
            if let Some(port) = port {
                config.api.port = port;
            }
            run_serve(config).await?;
        }
        Commands::Config { default } => {
            let config = if default {
                BridgeConfig::default()
            } else {
                BridgeConfig::load(cli.config.as_deref())?
            };
            println!("{}", config.to_toml()?);
        }
        Commands::Check => {
            let config = BridgeConfig::load(cli.config.as_deref())?;
            config.validate().context("configuration is invalid")?;
            println!(
                "Configuration OK: {} platform(s), API on {}:{}",
                config.platform_count(),
                config.api.host,
                config.api.port
            );
        }
    }

    Ok(())
}

async fn run_serve(config: BridgeConfig) -> Result<()> {
    tracing::info!("Starting BindSync {}", env!("CARGO_PKG_VERSION"));

    let bridge = Bridge::build(config)
        .await
        .context("failed to start relay")?;

    bridge
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    tracing::info!("BindSync stopped");
    Ok(())
}
