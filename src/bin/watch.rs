//! Dashpulse Watch
//!
//! Terminal client: prints every update of the given channels.
//! Uses the shared WebSocket while it is up and polls the REST API while
//! it is not.
//!
//! ```text
//! dashpulse-watch metrics:system docker:containers
//! dashpulse-watch --poll --interval-ms 5000 services
//! ```

use clap::Parser;
use dashpulse::client::{
    ConnectionManager, FetchMode, HttpRestSource, PanelConfig, PanelDataSource, PanelSnapshot,
    RestSource,
};
use dashpulse::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dashpulse-watch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Watch Dashpulse channels from the terminal")]
pub struct Cli {
    /// Channels to watch
    #[arg(required = true)]
    pub channels: Vec<String>,

    /// Server URL (default: client.server_url from config)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Poll the REST API instead of subscribing
    #[arg(long)]
    pub poll: bool,

    /// Polling interval in milliseconds (default: the channel's push interval)
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Print compact single-line JSON
    #[arg(long)]
    pub compact: bool,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, report) = Config::resolve(cli.config.as_deref())?;
    if let Some(server) = cli.server.clone() {
        config.client.server_url = server;
    }
    dashpulse::logging::init(&config.logging);
    report.log();

    let manager = Arc::new(ConnectionManager::new(config.client.options()));
    manager.on_connection_change(|connected| {
        if connected {
            tracing::info!("Live: receiving pushes");
        } else {
            tracing::warn!("Disconnected: falling back to polling");
        }
    });
    manager.connect();

    let rest: Arc<dyn RestSource> = Arc::new(HttpRestSource::new(config.client.server_url.clone()));
    let panel_config = PanelConfig {
        mode: if cli.poll {
            FetchMode::Polling
        } else {
            FetchMode::WebSocket
        },
        polling_interval: cli.interval_ms.map(Duration::from_millis),
        enabled: true,
    };

    let mut panels = Vec::with_capacity(cli.channels.len());
    let mut printers = Vec::with_capacity(cli.channels.len());
    for channel in &cli.channels {
        let panel = PanelDataSource::new(
            channel.clone(),
            Arc::clone(&manager),
            Arc::clone(&rest),
            panel_config.clone(),
        );
        printers.push(tokio::spawn(print_updates(
            channel.clone(),
            panel.watch(),
            cli.compact,
        )));
        panels.push(panel);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Stopping");

    for printer in printers {
        printer.abort();
    }
    drop(panels);
    manager.disconnect().await;
    Ok(())
}

async fn print_updates(
    channel: String,
    mut updates: tokio::sync::watch::Receiver<PanelSnapshot>,
    compact: bool,
) {
    let mut last_printed = None;

    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();

        if let Some(error) = &snapshot.error {
            eprintln!("[{}] error: {}", channel, error);
        }

        if snapshot.last_update.is_none() || snapshot.last_update == last_printed {
            continue;
        }
        last_printed = snapshot.last_update;

        let Some(data) = &snapshot.data else {
            continue;
        };
        let body = if compact {
            serde_json::to_string(data)
        } else {
            serde_json::to_string_pretty(data)
        }
        .unwrap_or_else(|e| format!("<unprintable: {}>", e));

        let mode = if snapshot.is_live() { "push" } else { "poll" };
        let when = snapshot
            .last_update
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_default();
        println!("[{}] {} ({}) {}", channel, when, mode, body);
    }
}
