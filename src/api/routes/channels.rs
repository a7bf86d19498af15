//! Channel Routes
//!
//! REST fallback for clients that cannot hold a WebSocket open.
//!
//! - GET /api/v1/channels - List channels
//! - GET /api/v1/channels/:channel - Current value of a channel

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::api::dto::{ChannelListResponse, ChannelSummary};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/v1/channels
pub async fn list_channels(State(state): State<Arc<AppState>>) -> Json<ChannelListResponse> {
    let stats = state.hub.stats().await;

    let channels: Vec<ChannelSummary> = state
        .hub
        .registry()
        .info()
        .into_iter()
        .map(|info| {
            let subscribers = stats.channels.get(&info.name).copied().unwrap_or(0);
            ChannelSummary::new(info, subscribers)
        })
        .collect();

    Json(ChannelListResponse {
        total: channels.len(),
        running: stats.running,
        channels,
    })
}

/// GET /api/v1/channels/:channel
///
/// Fetches fresh data with the channel's own fetcher. The body has the
/// same shape as the `data` field of a pushed frame. Change detection is
/// not consulted.
pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> ApiResult<Json<Value>> {
    let spec = state
        .hub
        .registry()
        .get(&channel)
        .ok_or_else(|| ApiError::NotFound(format!("Channel {} not found", channel)))?;

    let data = spec.fetcher.fetch().await.map_err(|e| {
        tracing::warn!(channel = %channel, error = %e, "REST fetch failed");
        ApiError::from(e)
    })?;

    Ok(Json(data))
}
