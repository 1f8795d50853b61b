use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::SystemTime};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{metrics::AutoMetrics, zone::ReloadHandle, zone::ZoneTable};

/// HTTP server for metrics export and health checks
pub struct HttpServer {
    table: Arc<ZoneTable>,
    metrics: Arc<AutoMetrics>,
    reload: Option<ReloadHandle>,
    bind_addr: SocketAddr,
}

impl HttpServer {
    pub fn new(
        table: Arc<ZoneTable>,
        metrics: Arc<AutoMetrics>,
        reload: Option<ReloadHandle>,
        bind_addr: SocketAddr,
    ) -> Self {
        Self {
            table,
            metrics,
            reload,
            bind_addr,
        }
    }

    fn router(self) -> Router {
        let app_state = AppState {
            table: self.table,
            metrics: self.metrics,
            reload: self.reload,
            startup_time: SystemTime::now(),
        };

        Router::new()
            .route("/health", get(health_check))
            .route("/metrics", get(prometheus_metrics))
            .route("/zones", get(zone_list))
            .route("/reload", post(reload_zones))
            .with_state(app_state)
    }

    /// Serve until `shutdown` fires
    pub async fn start(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let bind_addr = self.bind_addr;
        let app = self.router();

        info!("Starting HTTP server on {}", bind_addr);
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    table: Arc<ZoneTable>,
    metrics: Arc<AutoMetrics>,
    reload: Option<ReloadHandle>,
    startup_time: SystemTime,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state
        .startup_time
        .elapsed()
        .map(|d| d.as_secs())
        .unwrap_or_default();

    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "zones": state.table.len(),
            "uptime_seconds": uptime,
        })),
    )
}

/// Prometheus metrics endpoint
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    state.metrics.set_zones_loaded(state.table.len());

    match state.metrics.export() {
        Ok(metrics) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            metrics,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to export metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to export metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Published zones with their serials
async fn zone_list(State(state): State<AppState>) -> impl IntoResponse {
    let mut names = state.table.names();
    names.sort();

    let zones: Vec<_> = names
        .iter()
        .filter_map(|name| state.table.lookup(name))
        .map(|zone| {
            json!({
                "origin": zone.origin,
                "serial": zone.serial,
                "records": zone.record_count(),
                "file": zone.file_path.as_ref().map(|p| p.display().to_string()),
            })
        })
        .collect();

    Json(json!({ "zones": zones }))
}

/// Request an immediate rescan of the zone directory
async fn reload_zones(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload {
        Some(ref handle) => {
            let queued = handle.trigger();
            info!("Zone reload requested via HTTP endpoint");
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "status": "accepted",
                    "queued": queued,
                })),
            )
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "message": "Zone reloading is not enabled"
            })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(reload: Option<ReloadHandle>) -> AppState {
        AppState {
            table: Arc::new(ZoneTable::new(["."]).unwrap()),
            metrics: Arc::new(AutoMetrics::new().unwrap()),
            reload,
            startup_time: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = health_check(State(state(None))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = prometheus_metrics(State(state(None))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_endpoint() {
        let response = reload_zones(State(state(None))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let (handle, mut rx) = ReloadHandle::channel();
        let response = reload_zones(State(state(Some(handle)))).await.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(()));
    }
}
