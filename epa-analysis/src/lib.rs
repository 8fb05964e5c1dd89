//! epa-analysis library interface
//!
//! Multi-phase estate-plan analysis orchestrator. Exposed as a library so the
//! binary and the integration tests share one router and one coordinator.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use epa_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::{RunCoordinator, SubmissionLimiter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub coordinator: Arc<RunCoordinator>,
    /// Per-owner submission allowance
    pub submission_limiter: Arc<SubmissionLimiter>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<RunCoordinator>, submission_limiter: SubmissionLimiter) -> Self {
        Self {
            db: coordinator.db().clone(),
            event_bus: coordinator.event_bus().clone(),
            coordinator,
            submission_limiter: Arc::new(submission_limiter),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/runs/events", get(api::run_event_stream))
        .merge(api::run_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
