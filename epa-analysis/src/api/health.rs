//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database cannot be queried
    pub status: String,
    /// Module name ("epa-analysis")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Runs not yet terminal
    pub active_runs: u64,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let (status, active_runs) = match crate::db::runs::count_active_runs(&state.db).await {
        Ok(count) => ("ok", count.max(0) as u64),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not count active runs");
            ("degraded", 0)
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "epa-analysis".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        active_runs,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
