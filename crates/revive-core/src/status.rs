//! Informational HTTP surface: liveness, readiness and run stats

use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::stats::{RunStats, StatsSnapshot};
use crate::store::Store;

#[derive(Clone)]
pub struct StatusState {
    pub store: Arc<dyn Store>,
    pub stats: Arc<RunStats>,
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// 200 when the database answers
async fn readiness(State(state): State<StatusState>) -> (StatusCode, Json<HealthResponse>) {
    let store = state.store.clone();
    let ping = tokio::task::spawn_blocking(move || store.ping()).await;
    match ping {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready",
                version: env!("CARGO_PKG_VERSION"),
            }),
        ),
        Ok(Err(e)) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "database unavailable",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
        }
        Err(e) => {
            warn!("Readiness check panicked: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unknown",
                    version: env!("CARGO_PKG_VERSION"),
                }),
            )
        }
    }
}

async fn stats(State(state): State<StatusState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
