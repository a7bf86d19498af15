//! Link Routes
//!
//! - GET /api/v1/links - List links
//! - POST /api/v1/links - Create a link
//! - DELETE /api/v1/links/:id - Delete a link

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::api::dto::LinkListResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::links::{Link, LinkError, LinkStore, NewLink};

/// Run a link store call on the blocking pool
async fn with_store<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&LinkStore) -> Result<T, LinkError> + Send + 'static,
{
    let links = Arc::clone(&state.links);
    tokio::task::spawn_blocking(move || f(&links))
        .await
        .map_err(|e| ApiError::Internal(format!("Link task failed: {}", e)))?
        .map_err(ApiError::from)
}

/// GET /api/v1/links
pub async fn list_links(State(state): State<Arc<AppState>>) -> ApiResult<Json<LinkListResponse>> {
    let links = with_store(&state, |store| store.list()).await?;

    Ok(Json(LinkListResponse {
        total: links.len(),
        links,
    }))
}

/// POST /api/v1/links
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewLink>,
) -> ApiResult<(StatusCode, Json<Link>)> {
    let link = with_store(&state, move |store| store.create(request)).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// DELETE /api/v1/links/:id
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    with_store(&state, move |store| store.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
