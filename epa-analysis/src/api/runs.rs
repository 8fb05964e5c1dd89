//! Analysis run API handlers
//!
//! POST /runs, GET /runs/:run_id, GET /runs/:run_id/units,
//! GET /runs/:run_id/report, POST /runs/:run_id/cancel

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db,
    error::{ApiError, ApiResult, OrchestrationError},
    models::{ParsedIntake, PhaseStatus, PhaseType, RunStatus, RunType, StoredReport, UnitStatus},
    services::{CancelOutcome, SubmitError},
    AppState,
};

/// POST /runs request
#[derive(Debug, Deserialize)]
pub struct SubmitRunRequest {
    pub owner_id: String,
    pub client_id: String,
    pub intake: ParsedIntake,
}

/// POST /runs response
#[derive(Debug, Serialize)]
pub struct SubmitRunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
}

#[derive(Debug, Serialize)]
pub struct PhaseView {
    pub phase_number: u8,
    pub phase_type: PhaseType,
    pub status: PhaseStatus,
    pub total_runs: u32,
    pub completed_runs: u32,
    pub failed_runs: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// GET /runs/:run_id response
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub run_id: Uuid,
    pub owner_id: String,
    pub client_id: String,
    pub status: RunStatus,
    pub overall_progress: u8,
    pub current_phase: Option<u8>,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub final_report_id: Option<Uuid>,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub phases: Vec<PhaseView>,
}

/// One entry of GET /runs/:run_id/units
#[derive(Debug, Serialize)]
pub struct UnitView {
    pub result_id: Uuid,
    pub phase_number: u8,
    pub run_type: RunType,
    pub status: UnitStatus,
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// POST /runs/:run_id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub cancelled: bool,
}

/// POST /runs
///
/// Queue a run. Returns 202 before any phase starts.
pub async fn submit_run(
    State(state): State<AppState>,
    Json(request): Json<SubmitRunRequest>,
) -> ApiResult<(StatusCode, Json<SubmitRunResponse>)> {
    let owner_id = request.owner_id.trim().to_string();
    if !owner_id.is_empty() && !state.submission_limiter.check(&owner_id) {
        tracing::warn!(owner_id = %owner_id, "Submission rate limit exceeded");
        return Err(ApiError::TooManyRequests(format!(
            "Owner {} exceeded {} submissions per minute",
            owner_id,
            state.submission_limiter.per_minute()
        )));
    }

    let run_id = state
        .coordinator
        .submit(&owner_id, &request.client_id, request.intake)
        .await
        .map_err(|e| match e {
            SubmitError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            SubmitError::Conflict { .. } => ApiError::Conflict(e.to_string()),
            SubmitError::Storage(err) => ApiError::Common(err),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRunResponse {
            run_id,
            status: RunStatus::Pending,
        }),
    ))
}

/// GET /runs/:run_id
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<RunStatusResponse>> {
    let run = db::runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| run_not_found(run_id))?;
    let phases = db::phases::load_phases(&state.db, run_id).await?;
    let total_cost_usd = db::runs::total_cost_usd(&state.db, run_id).await?;

    Ok(Json(RunStatusResponse {
        run_id,
        elapsed_seconds: db::runs::elapsed_seconds(&run),
        owner_id: run.owner_id,
        client_id: run.client_id,
        status: run.status,
        overall_progress: run.overall_progress,
        current_phase: run.current_phase,
        last_error: run.last_error,
        retry_count: run.retry_count,
        final_report_id: run.final_report_id,
        total_cost_usd,
        created_at: run.created_at,
        started_at: run.started_at,
        completed_at: run.completed_at,
        phases: phases
            .into_iter()
            .map(|p| PhaseView {
                phase_number: p.phase_number,
                phase_type: p.phase_type,
                status: p.status,
                total_runs: p.total_runs,
                completed_runs: p.completed_runs,
                failed_runs: p.failed_runs,
                started_at: p.started_at,
                completed_at: p.completed_at,
            })
            .collect(),
    }))
}

/// GET /runs/:run_id/units
pub async fn get_run_units(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<Vec<UnitView>>> {
    if db::runs::load_run(&state.db, run_id).await?.is_none() {
        return Err(run_not_found(run_id));
    }

    let units = db::run_results::load_units(&state.db, run_id).await?;
    Ok(Json(
        units
            .into_iter()
            .map(|u| UnitView {
                result_id: u.result_id,
                phase_number: u.phase_number,
                run_type: u.run_type,
                status: u.status,
                error: u.error,
                retry_count: u.retry_count,
                started_at: u.started_at,
                completed_at: u.completed_at,
                duration_ms: u.duration_ms,
                cost_usd: u.cost_usd,
            })
            .collect(),
    ))
}

/// GET /runs/:run_id/report
///
/// 404 until the run has finished `completed` or `partial`.
pub async fn get_run_report(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<StoredReport>> {
    let report = db::reports::load_report(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No report for analysis run {}", run_id)))?;
    Ok(Json(report))
}

/// POST /runs/:run_id/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelRunResponse>> {
    let outcome = state.coordinator.cancel(run_id).await.map_err(|e| match e {
        OrchestrationError::RunNotFound(id) => run_not_found(id),
        OrchestrationError::Storage(err) => ApiError::Common(err),
        other => ApiError::Internal(other.to_string()),
    })?;

    match outcome {
        CancelOutcome::Cancelled => {
            tracing::info!(run_id = %run_id, "Analysis run cancelled by request");
            Ok(Json(CancelRunResponse {
                run_id,
                status: RunStatus::Failed,
                cancelled: true,
            }))
        }
        CancelOutcome::AlreadyTerminal(status) => Err(ApiError::BadRequest(format!(
            "Analysis run {} already {}",
            run_id, status
        ))),
    }
}

fn run_not_found(run_id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Analysis run not found: {}", run_id))
}

/// Build run routes
pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(submit_run))
        .route("/runs/:run_id", get(get_run_status))
        .route("/runs/:run_id/units", get(get_run_units))
        .route("/runs/:run_id/report", get(get_run_report))
        .route("/runs/:run_id/cancel", post(cancel_run))
}
