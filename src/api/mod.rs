//! Dashpulse REST API
//!
//! HTTP and WebSocket surface of the dashboard server, built with Axum.
//!
//! # Endpoints
//!
//! ## Channels
//! - `GET /api/v1/channels` - List channels with subscriber counts
//! - `GET /api/v1/channels/:channel` - Current value of a channel (polling fallback)
//!
//! ## Links
//! - `GET /api/v1/links` - List links
//! - `POST /api/v1/links` - Create a link
//! - `DELETE /api/v1/links/:id` - Delete a link
//!
//! ## Hub
//! - `GET /api/v1/ws/stats` - Connection and subscriber counts
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /ws` - Push channel connection
//!
//! # Example
//!
//! ```rust,ignore
//! use dashpulse::api::{serve, ApiConfig, AppState};
//! use dashpulse::websocket::{BroadcastHub, HubConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let links = Arc::new(LinkStore::in_memory()?);
//!     let registry = Arc::new(standard_registry(&CollectorsConfig::default(), links.clone())?);
//!     let hub = Arc::new(BroadcastHub::new(registry, HubConfig::default()));
//!
//!     serve(AppState::new(hub, links, ApiConfig::default())).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::websocket::websocket_handler;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Channel routes
        .route("/channels", get(routes::channels::list_channels))
        .route("/channels/:channel", get(routes::channels::get_channel))
        // Link routes
        .route(
            "/links",
            get(routes::links::list_links).post(routes::links::create_link),
        )
        .route("/links/:id", delete(routes::links::delete_link))
        // Hub routes
        .route("/ws/stats", get(routes::stats::ws_stats));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// Start the hub and serve on the configured address until Ctrl+C/SIGTERM
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.addr();
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Dashpulse listening on {}", addr);

    serve_with_shutdown(listener, state, shutdown_signal()).await
}

/// Start the hub and serve on `listener` until `shutdown` resolves.
/// The hub is stopped before returning.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), ApiError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = Arc::clone(&state.hub);
    hub.start();

    let router = build_router(state);
    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)));

    hub.stop();
    tracing::info!("Dashpulse shut down gracefully");
    result
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{
        fetcher_fn, ChannelRegistry, ChannelSpec, FetchError, StaticFetcher, Threshold,
    };
    use crate::links::LinkStore;
    use crate::websocket::{BroadcastHub, HubConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        let registry = ChannelRegistry::new()
            .with_channel(ChannelSpec::new(
                "metrics:system",
                Duration::from_secs(2),
                Threshold::Fraction(0.05),
                Arc::new(StaticFetcher::new(json!({ "cpu": { "load": 12.5 } }))),
            ))
            .with_channel(ChannelSpec::new(
                "docker:info",
                Duration::from_secs(5),
                Threshold::Always,
                fetcher_fn(|| async {
                    Err(FetchError::Unavailable("daemon down".to_string()))
                }),
            ));

        let hub = Arc::new(BroadcastHub::new(Arc::new(registry), HubConfig::default()));
        let links = Arc::new(LinkStore::in_memory().unwrap());
        AppState::new(hub, links, ApiConfig::default())
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        app.oneshot(builder.body(body).unwrap()).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = build_router(test_state());
        let response = send(app, "GET", "/health/live", None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_requires_running_hub() {
        let state = test_state();
        let hub = Arc::clone(&state.hub);
        let app = build_router(state);

        let response = send(app.clone(), "GET", "/health/ready", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        hub.start();
        let response = send(app.clone(), "GET", "/health/ready", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(send(app, "GET", "/health", None).await).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["hub"], "running");
        hub.stop();
    }

    #[tokio::test]
    async fn test_list_channels() {
        let app = build_router(test_state());
        let body = json_body(send(app, "GET", "/api/v1/channels", None).await).await;

        assert_eq!(body["total"], 2);
        assert_eq!(body["running"], false);
        assert_eq!(body["channels"][0]["name"], "metrics:system");
        assert_eq!(body["channels"][0]["threshold"], 0.05);
        assert_eq!(body["channels"][1]["threshold"], Value::Null);
        assert_eq!(body["channels"][0]["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_get_channel_returns_fetched_data() {
        let app = build_router(test_state());
        let response = send(app, "GET", "/api/v1/channels/metrics:system", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "cpu": { "load": 12.5 } }));
    }

    #[tokio::test]
    async fn test_get_channel_errors() {
        let app = build_router(test_state());

        let response = send(app.clone(), "GET", "/api/v1/channels/nope", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert!(body["request_id"].is_string());

        let response = send(app, "GET", "/api/v1/channels/docker:info", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_link_crud() {
        let app = build_router(test_state());

        let response = send(
            app.clone(),
            "POST",
            "/api/v1/links",
            Some(r#"{"name": "Grafana", "url": "http://grafana.lan:3000"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let id = created["id"].as_str().unwrap().to_string();

        let body = json_body(send(app.clone(), "GET", "/api/v1/links", None).await).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["links"][0]["name"], "Grafana");

        let uri = format!("/api/v1/links/{}", id);
        let response = send(app.clone(), "DELETE", &uri, None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(app, "DELETE", &uri, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_link_validation() {
        let app = build_router(test_state());

        let response = send(
            app.clone(),
            "POST",
            "/api/v1/links",
            Some(r#"{"name": "Files", "url": "ftp://nas"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");

        let response = send(app, "POST", "/api/v1/links", Some("not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ws_stats() {
        let app = build_router(test_state());
        let body = json_body(send(app, "GET", "/api/v1/ws/stats", None).await).await;

        assert_eq!(body["connections"], 0);
        assert_eq!(body["running"], false);
        assert_eq!(body["channels"]["metrics:system"], 0);
    }
}
