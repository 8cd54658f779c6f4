//! Process HTTP surface: Prometheus metrics and a liveness probe.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use log::info;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;

/// Answers whether this process's upstream collaborator is reachable.
/// The fetcher probes the weather API; the processor probes the broker.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn healthy(&self) -> bool;
}

#[derive(Clone)]
pub struct ApiState {
    pub prometheus: Option<PrometheusHandle>,
    pub probe: Arc<dyn HealthProbe>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Installs the global Prometheus recorder. Returns `None` when a recorder
/// is already installed (tests, repeated init).
pub fn install_recorder() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Binds and serves the API until the process exits.
pub async fn serve(port: u16, state: ApiState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("API listening on 0.0.0.0:{port}");
    axum::serve(listener, router(state)).await
}

async fn metrics(State(state): State<ApiState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
    }
}

async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    if state.probe.healthy().await {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "degraded" }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysUp;

    #[async_trait]
    impl HealthProbe for AlwaysUp {
        async fn healthy(&self) -> bool {
            true
        }
    }

    struct AlwaysDown;

    #[async_trait]
    impl HealthProbe for AlwaysDown {
        async fn healthy(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_healthz_ok() {
        let state = ApiState {
            prometheus: None,
            probe: Arc::new(AlwaysUp),
        };
        let response = healthz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_healthz_degraded() {
        let state = ApiState {
            prometheus: None,
            probe: Arc::new(AlwaysDown),
        };
        let response = healthz(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
