use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::shutdown::RunState;
use crate::supervisor::ConnectionState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub run_state: RunState,
    pub checks: HealthChecks,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub broker: ConnectionState,
    pub store: ConnectionState,
}

/// Health check endpoint. 503 unless both connections are up and the worker
/// is admitting messages.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let run_state = state.coordinator.run_state();
    let checks = HealthChecks {
        broker: state.broker.get(),
        store: state.store.get(),
    };

    let healthy = run_state == RunState::Running
        && checks.broker == ConnectionState::Connected
        && checks.store == ConnectionState::Connected;
    let (status, label) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            run_state,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics() -> Result<impl IntoResponse> {
    metrics::init_metrics().map_err(AppError::Internal)?;
    let body = metrics::gather().map_err(|e| AppError::Internal(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
