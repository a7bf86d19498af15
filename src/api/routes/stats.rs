//! Hub Stats Route
//!
//! - GET /api/v1/ws/stats - Connection and subscriber counts

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::state::AppState;
use crate::websocket::HubStats;

/// GET /api/v1/ws/stats
pub async fn ws_stats(State(state): State<Arc<AppState>>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}
