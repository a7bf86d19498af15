//! Dashpulse Server
//!
//! Run with: cargo run --bin dashpulse -- serve
//!
//! # Configuration
//!
//! Config file lookup: `--config`, then `~/.config/dashpulse/config.toml`,
//! `/etc/dashpulse/config.toml`, `./config.toml`.
//!
//! Environment variables:
//! - `DASHPULSE_HOST`: Host to bind to (default: 0.0.0.0)
//! - `DASHPULSE_PORT`: Port to listen on (default: 3001)
//! - `DASHPULSE_DB_PATH`: Link list database
//! - `DASHPULSE_DOCKER_URL`: Docker Engine API endpoint
//! - `DASHPULSE_LOG_LEVEL` / `DASHPULSE_LOG_FORMAT`: Logging
//! - `RUST_LOG`: Full filter override

use anyhow::Context;
use clap::{Parser, Subcommand};
use dashpulse::api::{serve, AppState};
use dashpulse::collectors::standard_registry;
use dashpulse::config::{generate_default_config, Config};
use dashpulse::links::LinkStore;
use dashpulse::websocket::BroadcastHub;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dashpulse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Self-hosted dashboard server with WebSocket push")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server (default)
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Generate default config file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let (mut config, report) = Config::resolve(cli.config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            dashpulse::logging::init(&config.logging);
            report.log();
            run_server(config).await
        }
        Commands::GenerateConfig { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Dashpulse v{}", env!("CARGO_PKG_VERSION"));

    let db_path = expand_home(&config.links.db_path);
    tracing::info!("Link database: {:?}", db_path);
    let links = Arc::new(
        LinkStore::open(&db_path)
            .with_context(|| format!("Failed to open link database {}", db_path.display()))?,
    );

    let registry = Arc::new(standard_registry(&config.collectors, Arc::clone(&links))?);
    tracing::info!(
        channels = registry.len(),
        docker = config.collectors.docker_enabled,
        "Channel registry ready"
    );

    let hub = Arc::new(BroadcastHub::new(registry, config.hub.hub_config()));
    let state = AppState::new(hub, links, config.server.api_config());

    serve(state).await?;
    Ok(())
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => Path::new(path).to_path_buf(),
    }
}
