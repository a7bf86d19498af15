//! Host metrics from `sysinfo`
//!
//! Every read refreshes only the part of the snapshot it needs. Reads are
//! blocking (procfs/sysfs), so fetchers run them on the blocking pool.

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use sysinfo::{Components, Disks, Networks, System};

use crate::channels::FetchError;

/// Processes reported on `metrics:processes`
pub const TOP_PROCESSES: usize = 10;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuLoad {
    /// Global usage in percent
    pub load: f64,
    pub cores: usize,
    pub load_average: LoadAverage,
}

#[derive(Debug, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub used_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct SystemSnapshot {
    pub cpu: CpuLoad,
    pub memory: MemoryUsage,
    pub uptime: u64,
    pub hostname: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SensorReading {
    pub label: String,
    pub temperature: f32,
    pub critical: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct TemperatureSnapshot {
    pub main: Option<f32>,
    pub max: Option<f32>,
    pub sensors: Vec<SensorReading>,
}

#[derive(Debug, Serialize)]
pub struct InterfaceRate {
    pub iface: String,
    pub rx_sec: f64,
    pub tx_sec: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct DiskUsage {
    pub fs: String,
    pub mount: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub used: u64,
    pub available: u64,
    /// Used space in percent, rounded to two decimals
    #[serde(rename = "use")]
    pub use_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cpu: f64,
    pub mem: u64,
}

#[derive(Debug, Serialize)]
pub struct ProcessSnapshot {
    pub all: usize,
    pub list: Vec<ProcessEntry>,
}

struct NetworkSampler {
    networks: Networks,
    sampled_at: Instant,
}

/// Shared, lazily refreshed view of the host
pub struct HostCollector {
    system: Mutex<System>,
    network: Mutex<NetworkSampler>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round2(part as f64 / whole as f64 * 100.0)
    }
}

impl HostCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta, so take the baseline now
        system.refresh_cpu();

        Self {
            system: Mutex::new(system),
            network: Mutex::new(NetworkSampler {
                networks: Networks::new_with_refreshed_list(),
                sampled_at: Instant::now(),
            }),
        }
    }

    pub fn system(&self) -> SystemSnapshot {
        let mut sys = lock(&self.system);
        sys.refresh_cpu();
        sys.refresh_memory();

        let load = System::load_average();
        let total = sys.total_memory();
        let available = sys.available_memory();
        let used = total.saturating_sub(available);

        SystemSnapshot {
            cpu: CpuLoad {
                load: round2(f64::from(sys.global_cpu_info().cpu_usage())),
                cores: sys.cpus().len(),
                load_average: LoadAverage {
                    one: load.one,
                    five: load.five,
                    fifteen: load.fifteen,
                },
            },
            memory: MemoryUsage {
                total,
                used,
                available,
                used_percent: percent(used, total),
            },
            uptime: System::uptime(),
            hostname: System::host_name(),
        }
    }

    pub fn temperature(&self) -> TemperatureSnapshot {
        let components = Components::new_with_refreshed_list();

        let sensors: Vec<SensorReading> = components
            .iter()
            .filter(|c| c.temperature().is_finite())
            .map(|c| SensorReading {
                label: c.label().to_string(),
                temperature: c.temperature(),
                critical: c.critical(),
            })
            .collect();

        let max = sensors
            .iter()
            .map(|s| s.temperature)
            .fold(None, |acc: Option<f32>, t| Some(acc.map_or(t, |m| m.max(t))));
        let main = sensors
            .iter()
            .find(|s| {
                let label = s.label.to_lowercase();
                label.contains("package") || label.contains("tctl") || label.contains("cpu")
            })
            .or_else(|| sensors.first())
            .map(|s| s.temperature);

        TemperatureSnapshot { main, max, sensors }
    }

    /// Per-interface byte rates since the previous call, sorted by name
    pub fn network(&self) -> Vec<InterfaceRate> {
        let mut sampler = lock(&self.network);
        sampler.networks.refresh();

        let now = Instant::now();
        let elapsed = now.duration_since(sampler.sampled_at).as_secs_f64();
        sampler.sampled_at = now;

        let per_sec = |bytes: u64| {
            if elapsed > 0.0 {
                round2(bytes as f64 / elapsed)
            } else {
                0.0
            }
        };

        let mut rates: Vec<InterfaceRate> = sampler
            .networks
            .iter()
            .map(|(name, data)| InterfaceRate {
                iface: name.clone(),
                rx_sec: per_sec(data.received()),
                tx_sec: per_sec(data.transmitted()),
                rx_bytes: data.total_received(),
                tx_bytes: data.total_transmitted(),
            })
            .collect();
        rates.sort_by(|a, b| a.iface.cmp(&b.iface));
        rates
    }

    pub fn disks(&self) -> Vec<DiskUsage> {
        let disks = Disks::new_with_refreshed_list();

        let mut usage: Vec<DiskUsage> = disks
            .iter()
            .map(|disk| {
                let size = disk.total_space();
                let available = disk.available_space();
                let used = size.saturating_sub(available);
                DiskUsage {
                    fs: disk.name().to_string_lossy().into_owned(),
                    mount: disk.mount_point().to_string_lossy().into_owned(),
                    kind: disk.file_system().to_string_lossy().into_owned(),
                    size,
                    used,
                    available,
                    use_percent: percent(used, size),
                }
            })
            .collect();
        usage.sort_by(|a, b| a.mount.cmp(&b.mount));
        usage
    }

    /// Busiest processes by CPU, highest first
    pub fn processes(&self, limit: usize) -> ProcessSnapshot {
        let mut sys = lock(&self.system);
        sys.refresh_processes();

        let mut list: Vec<ProcessEntry> = sys
            .processes()
            .values()
            .map(|p| ProcessEntry {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                cpu: round2(f64::from(p.cpu_usage())),
                mem: p.memory(),
            })
            .collect();

        list.sort_by(|a, b| b.cpu.total_cmp(&a.cpu).then(a.pid.cmp(&b.pid)));
        let all = list.len();
        list.truncate(limit);

        ProcessSnapshot { all, list }
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a host read on the blocking pool and serialize the result
pub async fn read<T, F>(host: Arc<HostCollector>, f: F) -> Result<Value, FetchError>
where
    T: Serialize,
    F: FnOnce(&HostCollector) -> T + Send + 'static,
    T: Send + 'static,
{
    let snapshot = tokio::task::spawn_blocking(move || f(&host))
        .await
        .map_err(|e| FetchError::Task(e.to_string()))?;

    Ok(serde_json::to_value(snapshot)?)
}
