//! Channel Registry
//!
//! Static table of push channels. Each entry carries everything the hub
//! needs to drive one channel: its polling interval, the significance
//! threshold, the comparator used by the change detector and the fetcher
//! that produces the channel's current value.
//!
//! ## Standard channels
//!
//! | channel                 | interval | threshold |
//! |-------------------------|----------|-----------|
//! | `metrics:system`        | 2s       | 0.05      |
//! | `metrics:temperature`   | 5s       | always    |
//! | `metrics:network`       | 1s       | 0.1       |
//! | `metrics:disk:detailed` | 10s      | 0.01      |
//! | `metrics:processes`     | 2s       | always    |
//! | `docker:containers`     | 5s       | always    |
//! | `docker:info`           | 5s       | always    |
//! | `services`              | 30s      | always    |

mod fetcher;

pub use fetcher::{fetcher_fn, FetchError, Fetcher, FnFetcher, StaticFetcher};

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::change::Comparator;

pub const SYSTEM: &str = "metrics:system";
pub const TEMPERATURE: &str = "metrics:temperature";
pub const NETWORK: &str = "metrics:network";
pub const DISK_DETAILED: &str = "metrics:disk:detailed";
pub const PROCESSES: &str = "metrics:processes";
pub const DOCKER_CONTAINERS: &str = "docker:containers";
pub const DOCKER_INFO: &str = "docker:info";
pub const SERVICES: &str = "services";

/// Significance threshold for a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// Broadcast on any structural change
    Always,
    /// Channel-specific fractional threshold (0.05 = 5%)
    Fraction(f64),
}

impl Threshold {
    pub fn as_fraction(&self) -> Option<f64> {
        match self {
            Threshold::Always => None,
            Threshold::Fraction(f) => Some(*f),
        }
    }
}

impl Serialize for Threshold {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_fraction().serialize(serializer)
    }
}

/// Static layout of one standard channel
#[derive(Debug, Clone, Copy)]
pub struct ChannelLayout {
    pub name: &'static str,
    pub interval_ms: u64,
    pub threshold: Threshold,
}

/// Intervals and thresholds of the standard channels
pub const STANDARD_LAYOUT: [ChannelLayout; 8] = [
    ChannelLayout {
        name: SYSTEM,
        interval_ms: 2_000,
        threshold: Threshold::Fraction(0.05),
    },
    ChannelLayout {
        name: TEMPERATURE,
        interval_ms: 5_000,
        threshold: Threshold::Always,
    },
    ChannelLayout {
        name: NETWORK,
        interval_ms: 1_000,
        threshold: Threshold::Fraction(0.1),
    },
    ChannelLayout {
        name: DISK_DETAILED,
        interval_ms: 10_000,
        threshold: Threshold::Fraction(0.01),
    },
    ChannelLayout {
        name: PROCESSES,
        interval_ms: 2_000,
        threshold: Threshold::Always,
    },
    ChannelLayout {
        name: DOCKER_CONTAINERS,
        interval_ms: 5_000,
        threshold: Threshold::Always,
    },
    ChannelLayout {
        name: DOCKER_INFO,
        interval_ms: 5_000,
        threshold: Threshold::Always,
    },
    ChannelLayout {
        name: SERVICES,
        interval_ms: 30_000,
        threshold: Threshold::Always,
    },
];

/// Look up the standard layout for a channel name
pub fn standard_layout(name: &str) -> Option<&'static ChannelLayout> {
    STANDARD_LAYOUT.iter().find(|l| l.name == name)
}

/// Comparator used for a standard channel when its threshold is numeric
pub fn standard_comparator(name: &str) -> Comparator {
    match name {
        SYSTEM => Comparator::scalar(["/cpu/load", "/memory/usedPercent"]),
        NETWORK => Comparator::interface_rates("iface", ["rx_sec", "tx_sec"]),
        DISK_DETAILED => Comparator::resource_array("mount", "use"),
        PROCESSES => Comparator::ranked_list("/list", "pid", "cpu"),
        DOCKER_CONTAINERS => Comparator::membership("id", "state"),
        _ => Comparator::Structural,
    }
}

/// One registered channel
pub struct ChannelSpec {
    pub name: String,
    pub interval: Duration,
    pub threshold: Threshold,
    pub comparator: Comparator,
    pub fetcher: Arc<dyn Fetcher>,
}

impl ChannelSpec {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        threshold: Threshold,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            threshold,
            comparator: Comparator::Structural,
            fetcher,
        }
    }

    /// Build a standard channel from its layout entry
    pub fn standard(layout: &ChannelLayout, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            name: layout.name.to_string(),
            interval: Duration::from_millis(layout.interval_ms),
            threshold: layout.threshold,
            comparator: standard_comparator(layout.name),
            fetcher,
        }
    }

    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }
}

impl std::fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("threshold", &self.threshold)
            .field("comparator", &self.comparator)
            .finish_non_exhaustive()
    }
}

/// Public description of a channel (REST listing)
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub interval_ms: u64,
    pub threshold: Threshold,
}

/// Immutable set of channels, in registration order
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<ChannelSpec>,
    by_name: HashMap<String, usize>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel, replacing any existing channel with the same name
    pub fn with_channel(mut self, spec: ChannelSpec) -> Self {
        match self.by_name.get(&spec.name) {
            Some(&idx) => self.channels[idx] = spec,
            None => {
                self.by_name.insert(spec.name.clone(), self.channels.len());
                self.channels.push(spec);
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ChannelSpec> {
        self.by_name.get(name).map(|&idx| &self.channels[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Channel names in registration order
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn info(&self) -> Vec<ChannelInfo> {
        self.channels
            .iter()
            .map(|c| ChannelInfo {
                name: c.name.clone(),
                interval_ms: c.interval.as_millis() as u64,
                threshold: c.threshold,
            })
            .collect()
    }
}
