//! Dashboard Client
//!
//! Client side of the push protocol.
//!
//! ## Architecture
//!
//! - **ConnectionManager**: One shared WebSocket per process, multiplexed
//!   across panels, with backoff reconnect
//! - **PanelDataSource**: Per-panel data feed that pushes over the shared
//!   connection when it is up and polls the REST API when it is not
//! - **Backoff**: Reconnect delay policy

mod backoff;
mod manager;
mod panel;

pub use backoff::Backoff;
pub use manager::{
    ClientOptions, ConnectionListener, ConnectionManager, ConnectionState, DataCallback,
    SubscriptionHandle,
};
pub use panel::{
    default_polling_interval, FetchMode, HttpRestSource, PanelConfig, PanelDataSource,
    PanelSnapshot, RestSource,
};

use std::time::Duration;
use thiserror::Error;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
