//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::client::{Backoff, ClientOptions};
use crate::websocket::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubSection,

    #[serde(default)]
    pub collectors: CollectorsConfig,

    #[serde(default)]
    pub links: LinksConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            host: self.host.clone(),
            port: self.port,
            cors_origins: self.cors_origins.clone(),
        }
    }
}

/// Broadcast hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    1000
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

impl HubSection {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.max_connections,
        }
    }
}

/// Data collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default = "default_docker_enabled")]
    pub docker_enabled: bool,

    /// Docker Engine API endpoint
    #[serde(default = "default_docker_url")]
    pub docker_url: String,

    #[serde(default = "default_docker_timeout")]
    pub docker_timeout_ms: u64,

    /// Processes listed on `metrics:processes`
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
}

fn default_docker_enabled() -> bool {
    true
}

fn default_docker_url() -> String {
    "http://127.0.0.1:2375".to_string()
}

fn default_docker_timeout() -> u64 {
    3000
}

fn default_top_processes() -> usize {
    crate::collectors::TOP_PROCESSES
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            docker_enabled: default_docker_enabled(),
            docker_url: default_docker_url(),
            docker_timeout_ms: default_docker_timeout(),
            top_processes: default_top_processes(),
        }
    }
}

/// Link list storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LinksConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("dashpulse").join("links.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./dashpulse_data/links.db".to_string())
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// Client (`dashpulse-watch`) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Base HTTP URL of the server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ClientConfig {
    /// WebSocket endpoint derived from `server_url`
    pub fn ws_url(&self) -> String {
        let base = self.server_url.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!("{}/ws", base)
    }

    pub fn options(&self) -> ClientOptions {
        ClientOptions {
            url: self.ws_url(),
            backoff: Backoff::new(
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            ),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path, or from default locations.
    ///
    /// Runs before logging is set up, so what happened is returned in the
    /// [`LoadReport`] instead of being logged.
    pub fn resolve(path: Option<&Path>) -> Result<(Self, LoadReport), ConfigError> {
        match path {
            Some(path) => {
                let mut config = Self::load(path)?;
                let warnings = config.apply_env_overrides();
                Ok((
                    config,
                    LoadReport {
                        source: Some(path.to_path_buf()),
                        warnings,
                    },
                ))
            }
            None => Ok(Self::load_default()),
        }
    }

    /// Load from default locations or environment
    pub fn load_default() -> (Self, LoadReport) {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("dashpulse").join("config.toml")),
            Some(PathBuf::from("/etc/dashpulse/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        Self::load_first(config_paths.iter().flatten())
    }

    fn load_first<'a, I>(paths: I) -> (Self, LoadReport)
    where
        I: IntoIterator<Item = &'a PathBuf>,
    {
        let mut report = LoadReport::default();

        for path in paths {
            if !path.exists() {
                continue;
            }
            match Self::load(path) {
                Ok(mut config) => {
                    report.warnings.extend(config.apply_env_overrides());
                    report.source = Some(path.clone());
                    return (config, report);
                }
                Err(e) => report.warnings.push(e.to_string()),
            }
        }

        let mut config = Config::default();
        report.warnings.extend(config.apply_env_overrides());
        (config, report)
    }

    fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `DASHPULSE_*` overrides from a variable lookup, returning a
    /// warning for each value that was ignored
    fn apply_overrides<F>(&mut self, var: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(host) = var("DASHPULSE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("DASHPULSE_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => warnings.push(format!("Ignoring invalid DASHPULSE_PORT '{}'", port)),
            }
        }

        if let Some(db_path) = var("DASHPULSE_DB_PATH") {
            self.links.db_path = db_path;
        }

        if let Some(url) = var("DASHPULSE_DOCKER_URL") {
            self.collectors.docker_url = url;
        }

        if let Some(url) = var("DASHPULSE_SERVER_URL") {
            self.client.server_url = url;
        }

        if let Some(level) = var("DASHPULSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("DASHPULSE_LOG_FORMAT") {
            self.logging.format = format;
        }

        warnings
    }
}

/// Outcome of [`Config::resolve`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    /// File the config was read from, `None` for built-in defaults
    pub source: Option<PathBuf>,
    /// Files that failed to load and overrides that were ignored
    pub warnings: Vec<String>,
}

impl LoadReport {
    /// Log the outcome; call once tracing is initialised
    pub fn log(&self) {
        for warning in &self.warnings {
            tracing::warn!("{}", warning);
        }
        match &self.source {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config with environment overrides"),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Dashpulse Configuration
#
# Environment variables override these settings:
# - DASHPULSE_HOST
# - DASHPULSE_PORT
# - DASHPULSE_DB_PATH
# - DASHPULSE_DOCKER_URL
# - DASHPULSE_SERVER_URL
# - DASHPULSE_LOG_LEVEL
# - DASHPULSE_LOG_FORMAT

[server]
# Server host
host = "0.0.0.0"

# Server port (REST API and /ws)
port = 3001

# Allowed CORS origins (empty allows any origin)
cors_origins = []

[hub]
# Maximum concurrent WebSocket connections
max_connections = 1000

[collectors]
# Poll the Docker Engine API for docker:* channels
docker_enabled = true

# Docker Engine API endpoint (dockerd -H tcp://127.0.0.1:2375)
docker_url = "http://127.0.0.1:2375"

# Docker request timeout (ms)
docker_timeout_ms = 3000

# Processes listed on metrics:processes
top_processes = 10

[links]
# SQLite file holding the service link list
db_path = "~/.local/share/dashpulse/links.db"

[client]
# Server used by dashpulse-watch
server_url = "http://localhost:3001"

# Reconnect backoff (ms)
initial_backoff_ms = 1000
max_backoff_ms = 30000

# WebSocket connect timeout (seconds)
connect_timeout_secs = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
