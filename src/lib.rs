//! # Dashpulse
//!
//! Self-hosted dashboard server that pushes host, Docker and service data
//! to browser panels over one WebSocket per client.
//!
//! ## Features
//!
//! - **Push channels**: Each channel is fetched on its own interval and only
//!   while someone is subscribed
//! - **Change filtering**: Per-channel comparators suppress insignificant updates
//! - **Shared client connection**: One multiplexed, self-healing WebSocket per
//!   client process, with REST polling as a fallback
//!
//! ## Modules
//!
//! - [`channels`]: Channel registry and fetchers
//! - [`change`]: Change detector and comparators
//! - [`websocket`]: Broadcast hub and wire protocol
//! - [`client`]: Connection manager and panel data sources
//! - [`collectors`]: Host, Docker and link fetchers
//! - [`links`]: SQLite link list
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dashpulse::client::{ClientOptions, ConnectionManager};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ConnectionManager::new(ClientOptions::new("ws://localhost:3001/ws"));
//!     manager.connect();
//!
//!     let _cpu = manager.subscribe("metrics:system", |data, timestamp| {
//!         println!("{} {}", timestamp, data["cpu"]["load"]);
//!     });
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     manager.disconnect().await;
//! }
//! ```

pub mod api;
pub mod change;
pub mod channels;
pub mod client;
pub mod collectors;
pub mod config;
pub mod links;
pub mod logging;
pub mod websocket;

// Re-export top-level types for convenience
pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use change::{ChangeDetector, Comparator};

pub use channels::{ChannelRegistry, ChannelSpec, FetchError, Fetcher, Threshold};

pub use client::{
    ClientError, ClientOptions, ConnectionManager, FetchMode, PanelConfig, PanelDataSource,
    PanelSnapshot,
};

pub use websocket::{BroadcastHub, ClientMessage, HubConfig, HubError, ServerMessage};

pub use config::{Config, ConfigError, LoadReport, LoggingConfig};

pub use links::{Link, LinkError, LinkStore};
