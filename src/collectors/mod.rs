//! Data Collectors
//!
//! Fetchers behind the standard channels.
//!
//! - **HostCollector**: CPU, memory, temperature, network, disks and
//!   processes via `sysinfo`
//! - **DockerClient**: Containers and daemon info via the Docker Engine API
//! - **Links**: The service link list for `services`

mod docker;
mod host;

pub use docker::{ContainerSummary, DaemonInfo, DockerClient, DockerError};
pub use host::{
    DiskUsage, HostCollector, InterfaceRate, ProcessEntry, ProcessSnapshot, SystemSnapshot,
    TemperatureSnapshot, TOP_PROCESSES,
};

use std::sync::Arc;
use std::time::Duration;

use crate::channels::{
    fetcher_fn, ChannelRegistry, ChannelSpec, FetchError, Fetcher, DISK_DETAILED,
    DOCKER_CONTAINERS, DOCKER_INFO, NETWORK, PROCESSES, SERVICES, STANDARD_LAYOUT, SYSTEM,
    TEMPERATURE,
};
use crate::config::CollectorsConfig;
use crate::links::LinkStore;

/// Build the registry of standard channels backed by the real collectors
pub fn standard_registry(
    config: &CollectorsConfig,
    links: Arc<LinkStore>,
) -> Result<ChannelRegistry, DockerError> {
    let host = Arc::new(HostCollector::new());
    let docker = if config.docker_enabled {
        Some(Arc::new(DockerClient::new(
            config.docker_url.clone(),
            Duration::from_millis(config.docker_timeout_ms),
        )?))
    } else {
        tracing::info!("Docker collector disabled");
        None
    };

    let mut registry = ChannelRegistry::new();
    for layout in STANDARD_LAYOUT.iter() {
        let fetcher = match layout.name {
            SYSTEM => host_fetcher(&host, |h| h.system()),
            TEMPERATURE => host_fetcher(&host, |h| h.temperature()),
            NETWORK => host_fetcher(&host, |h| h.network()),
            DISK_DETAILED => host_fetcher(&host, |h| h.disks()),
            PROCESSES => {
                let limit = config.top_processes;
                host_fetcher(&host, move |h| h.processes(limit))
            }
            DOCKER_CONTAINERS => docker_containers(docker.clone()),
            DOCKER_INFO => docker_info(docker.clone()),
            SERVICES => services(Arc::clone(&links)),
            _ => continue,
        };
        registry = registry.with_channel(ChannelSpec::standard(layout, fetcher));
    }

    Ok(registry)
}

fn host_fetcher<T, F>(collector: &Arc<HostCollector>, read: F) -> Arc<dyn Fetcher>
where
    T: serde::Serialize + Send + 'static,
    F: Fn(&HostCollector) -> T + Send + Sync + Clone + 'static,
{
    let collector = Arc::clone(collector);
    fetcher_fn(move || host::read(Arc::clone(&collector), read.clone()))
}

fn docker_disabled() -> FetchError {
    FetchError::Unavailable("docker collector disabled".to_string())
}

fn docker_containers(docker: Option<Arc<DockerClient>>) -> Arc<dyn Fetcher> {
    fetcher_fn(move || {
        let docker = docker.clone();
        async move {
            let docker = docker.ok_or_else(docker_disabled)?;
            let containers = docker.containers().await?;
            Ok::<_, FetchError>(serde_json::to_value(containers)?)
        }
    })
}

fn docker_info(docker: Option<Arc<DockerClient>>) -> Arc<dyn Fetcher> {
    fetcher_fn(move || {
        let docker = docker.clone();
        async move {
            let docker = docker.ok_or_else(docker_disabled)?;
            let info = docker.info().await?;
            Ok::<_, FetchError>(serde_json::to_value(info)?)
        }
    })
}

fn services(links: Arc<LinkStore>) -> Arc<dyn Fetcher> {
    fetcher_fn(move || {
        let links = Arc::clone(&links);
        async move {
            let list = tokio::task::spawn_blocking(move || links.list())
                .await
                .map_err(|e| FetchError::Task(e.to_string()))?
                .map_err(|e| FetchError::Unavailable(e.to_string()))?;
            Ok::<_, FetchError>(serde_json::to_value(list)?)
        }
    })
}
