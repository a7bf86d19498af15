//! Data Transfer Objects
//!
//! Response bodies of the REST API.

use serde::Serialize;

use crate::channels::{ChannelInfo, Threshold};
use crate::links::Link;

// ============================================
// CHANNEL DTOs
// ============================================

/// One channel with its live subscriber count
#[derive(Debug, Serialize)]
pub struct ChannelSummary {
    pub name: String,
    pub interval_ms: u64,
    /// Fractional threshold, `null` for "any change"
    pub threshold: Threshold,
    pub subscribers: usize,
}

impl ChannelSummary {
    pub fn new(info: ChannelInfo, subscribers: usize) -> Self {
        Self {
            name: info.name,
            interval_ms: info.interval_ms,
            threshold: info.threshold,
            subscribers,
        }
    }
}

/// List of channels
#[derive(Debug, Serialize)]
pub struct ChannelListResponse {
    pub total: usize,
    pub running: bool,
    pub channels: Vec<ChannelSummary>,
}

// ============================================
// LINK DTOs
// ============================================

/// List of links
#[derive(Debug, Serialize)]
pub struct LinkListResponse {
    pub total: usize,
    pub links: Vec<Link>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded, unhealthy
    pub status: String,
    /// Hub scheduler status: running, stopped
    pub hub: String,
    /// Link store status
    pub links: String,
    /// Open WebSocket connections
    pub connections: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
