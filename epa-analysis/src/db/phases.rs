//! Phase persistence

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;
use epa_common::Result;

use super::{now_rfc3339, parse_enum, parse_opt_timestamp, parse_uuid};
use crate::models::{Phase, PhaseAggregate, PhaseCounts, RunStatus};

pub(crate) async fn insert_phase(conn: &mut SqliteConnection, phase: &Phase) -> Result<()> {
    let aggregated = phase
        .aggregated_results
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO analysis_phases (
            phase_id, run_id, phase_number, phase_type, status,
            total_runs, completed_runs, failed_runs, started_at, completed_at, aggregated_results
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(phase.phase_id.to_string())
    .bind(phase.run_id.to_string())
    .bind(i64::from(phase.phase_number))
    .bind(phase.phase_type.as_str())
    .bind(phase.status.as_str())
    .bind(i64::from(phase.total_runs))
    .bind(i64::from(phase.completed_runs))
    .bind(i64::from(phase.failed_runs))
    .bind(phase.started_at.map(|t| t.to_rfc3339()))
    .bind(phase.completed_at.map(|t| t.to_rfc3339()))
    .bind(aggregated)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

const PHASE_COLUMNS: &str = "phase_id, run_id, phase_number, phase_type, status, total_runs, \
     completed_runs, failed_runs, started_at, completed_at, aggregated_results";

/// All three phases of a run, ordered by phase number
pub async fn load_phases(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<Phase>> {
    let sql = format!(
        "SELECT {} FROM analysis_phases WHERE run_id = ? ORDER BY phase_number",
        PHASE_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(run_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_phase).collect()
}

pub async fn load_phase(pool: &SqlitePool, run_id: Uuid, phase_number: u8) -> Result<Option<Phase>> {
    let sql = format!(
        "SELECT {} FROM analysis_phases WHERE run_id = ? AND phase_number = ?",
        PHASE_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(run_id.to_string())
        .bind(i64::from(phase_number))
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_phase).transpose()
}

fn row_to_phase(row: &SqliteRow) -> Result<Phase> {
    let phase_id: String = row.get("phase_id");
    let run_id: String = row.get("run_id");
    let phase_type: String = row.get("phase_type");
    let status: String = row.get("status");
    let aggregated: Option<String> = row.get("aggregated_results");

    Ok(Phase {
        phase_id: parse_uuid(&phase_id, "phase_id")?,
        run_id: parse_uuid(&run_id, "run_id")?,
        phase_number: row.get::<i64, _>("phase_number") as u8,
        phase_type: parse_enum(&phase_type)?,
        status: parse_enum(&status)?,
        total_runs: row.get::<i64, _>("total_runs") as u32,
        completed_runs: row.get::<i64, _>("completed_runs") as u32,
        failed_runs: row.get::<i64, _>("failed_runs") as u32,
        started_at: parse_opt_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_opt_timestamp(row.get("completed_at"), "completed_at")?,
        aggregated_results: aggregated
            .map(|json| serde_json::from_str::<PhaseAggregate>(&json))
            .transpose()?,
    })
}

/// Mark a phase running (idempotent for a resumed phase)
///
/// Returns `false` if the phase already resolved or its run is terminal.
pub async fn mark_running(pool: &SqlitePool, phase_id: Uuid) -> Result<bool> {
    let sql = format!(
        "UPDATE analysis_phases
         SET status = 'running', started_at = COALESCE(started_at, ?)
         WHERE phase_id = ? AND status IN ('pending', 'running')
           AND EXISTS (
               SELECT 1 FROM analysis_runs r
               WHERE r.run_id = analysis_phases.run_id AND r.status NOT IN {}
           )",
        RunStatus::TERMINAL_SQL
    );
    let result = sqlx::query(&sql)
        .bind(now_rfc3339())
        .bind(phase_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Complete a running phase and store its aggregate
///
/// Only succeeds once every unit is terminal (`completed + failed == total`)
/// and the run is still live.
pub async fn complete_phase(
    pool: &SqlitePool,
    phase_id: Uuid,
    aggregate: &PhaseAggregate,
) -> Result<bool> {
    let aggregated = serde_json::to_string(aggregate)?;
    let sql = format!(
        "UPDATE analysis_phases
         SET status = 'completed', completed_at = ?, aggregated_results = ?
         WHERE phase_id = ? AND status = 'running'
           AND completed_runs + failed_runs = total_runs
           AND EXISTS (
               SELECT 1 FROM analysis_runs r
               WHERE r.run_id = analysis_phases.run_id AND r.status NOT IN {}
           )",
        RunStatus::TERMINAL_SQL
    );
    let result = sqlx::query(&sql)
        .bind(now_rfc3339())
        .bind(aggregated)
        .bind(phase_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Current unit counters of a phase
pub async fn load_counts(pool: &SqlitePool, phase_id: Uuid) -> Result<Option<PhaseCounts>> {
    let row: Option<(i64, i64, i64)> = sqlx::query_as(
        "SELECT total_runs, completed_runs, failed_runs FROM analysis_phases WHERE phase_id = ?",
    )
    .bind(phase_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(total, completed, failed)| PhaseCounts {
        total_runs: total as u32,
        completed_runs: completed as u32,
        failed_runs: failed as u32,
    }))
}
