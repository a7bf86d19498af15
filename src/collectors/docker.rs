//! Docker Engine API client
//!
//! Talks to the daemon over its TCP endpoint (`dockerd -H tcp://...`).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::channels::FetchError;

/// Docker Engine API client
pub struct DockerClient {
    client: Client,
    base_url: String,
}

/// Container as reported on `docker:containers`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
}

/// Daemon summary as reported on `docker:info`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    pub containers: u64,
    pub running: u64,
    pub paused: u64,
    pub stopped: u64,
    pub images: u64,
    pub server_version: String,
    pub operating_system: String,
    pub cpus: u64,
    pub memory: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInfo {
    #[serde(default)]
    containers: u64,
    #[serde(default)]
    containers_running: u64,
    #[serde(default)]
    containers_paused: u64,
    #[serde(default)]
    containers_stopped: u64,
    #[serde(default)]
    images: u64,
    #[serde(default)]
    server_version: String,
    #[serde(default)]
    operating_system: String,
    #[serde(default, rename = "NCPU")]
    ncpu: u64,
    #[serde(default)]
    mem_total: u64,
}

impl From<RawContainer> for ContainerSummary {
    fn from(raw: RawContainer) -> Self {
        let name = raw
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        let id = raw.id.chars().take(12).collect();

        Self {
            id,
            name,
            image: raw.image,
            state: raw.state,
            status: raw.status,
        }
    }
}

impl From<RawInfo> for DaemonInfo {
    fn from(raw: RawInfo) -> Self {
        Self {
            containers: raw.containers,
            running: raw.containers_running,
            paused: raw.containers_paused,
            stopped: raw.containers_stopped,
            images: raw.images,
            server_version: raw.server_version,
            operating_system: raw.operating_system,
            cpus: raw.ncpu,
            memory: raw.mem_total,
        }
    }
}

impl DockerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DockerError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// All containers, running or not, sorted by name
    pub async fn containers(&self) -> Result<Vec<ContainerSummary>, DockerError> {
        let url = format!("{}/containers/json?all=true", self.base_url);
        let raw: Vec<RawContainer> = self.get_json(&url).await?;

        let mut containers: Vec<ContainerSummary> = raw.into_iter().map(Into::into).collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    pub async fn info(&self) -> Result<DaemonInfo, DockerError> {
        let url = format!("{}/info", self.base_url);
        let raw: RawInfo = self.get_json(&url).await?;
        Ok(raw.into())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, DockerError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DockerError::Timeout
            } else if e.is_connect() {
                DockerError::Unavailable
            } else {
                DockerError::Request(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DockerError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Docker client errors
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon unavailable")]
    Unavailable,

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Request timeout")]
    Timeout,
}

impl From<DockerError> for FetchError {
    fn from(err: DockerError) -> Self {
        FetchError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_container_summary_from_api_shape() {
        let raw: RawContainer = serde_json::from_value(json!({
            "Id": "4f66ad9a0b2e8f1c5d3e7a9b",
            "Names": ["/postgres"],
            "Image": "postgres:16",
            "State": "running",
            "Status": "Up 3 hours",
            "Ports": []
        }))
        .unwrap();

        let summary = ContainerSummary::from(raw);
        assert_eq!(summary.id, "4f66ad9a0b2e");
        assert_eq!(summary.name, "postgres");
        assert_eq!(summary.state, "running");
    }

    #[test]
    fn test_daemon_info_from_api_shape() {
        let raw: RawInfo = serde_json::from_value(json!({
            "Containers": 4,
            "ContainersRunning": 3,
            "ContainersPaused": 0,
            "ContainersStopped": 1,
            "Images": 12,
            "ServerVersion": "25.0.3",
            "NCPU": 8,
            "MemTotal": 16_000_000_000u64
        }))
        .unwrap();

        let info = DaemonInfo::from(raw);
        assert_eq!(info.running, 3);
        assert_eq!(info.cpus, 8);
        assert_eq!(info.operating_system, "");

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["serverVersion"], "25.0.3");
    }

    #[tokio::test]
    async fn test_unreachable_daemon_maps_to_fetch_error() {
        let client = DockerClient::new("http://127.0.0.1:1/", Duration::from_millis(500)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:1");

        let err: FetchError = client.containers().await.unwrap_err().into();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }
}
