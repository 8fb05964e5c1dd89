//! Work unit (RunResult) persistence
//!
//! A unit moves pending → running → {completed, failed}. The terminal write and
//! the phase counter increment happen in one transaction, guarded on the unit
//! still being `running` and its run still being live. A result that loses
//! that race is discarded.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;
use epa_common::Result;

use super::{now_rfc3339, parse_enum, parse_opt_timestamp, parse_uuid, settings};
use crate::models::{PhaseCounts, RunResult, RunStatus, UnitFindings, UnitStatus};
use crate::utils::retry_on_lock;

pub(crate) async fn insert_unit(conn: &mut SqliteConnection, unit: &RunResult) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO run_results (
            result_id, run_id, phase_id, phase_number, run_type, ordinal, status, retry_count
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(unit.result_id.to_string())
    .bind(unit.run_id.to_string())
    .bind(unit.phase_id.to_string())
    .bind(i64::from(unit.phase_number))
    .bind(unit.run_type.as_str())
    .bind(i64::from(unit.ordinal))
    .bind(unit.status.as_str())
    .bind(i64::from(unit.retry_count))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

const UNIT_COLUMNS: &str = "result_id, run_id, phase_id, phase_number, run_type, ordinal, status, \
     prompt, result, error, started_at, completed_at, duration_ms, cost_usd, retry_count";

/// Every unit of a run, by phase then applicability order
pub async fn load_units(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<RunResult>> {
    let sql = format!(
        "SELECT {} FROM run_results WHERE run_id = ? ORDER BY phase_number, ordinal",
        UNIT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(run_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_unit).collect()
}

/// Units of one phase in applicability order
pub async fn load_phase_units(pool: &SqlitePool, phase_id: Uuid) -> Result<Vec<RunResult>> {
    let sql = format!(
        "SELECT {} FROM run_results WHERE phase_id = ? ORDER BY ordinal",
        UNIT_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(phase_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_unit).collect()
}

fn row_to_unit(row: &SqliteRow) -> Result<RunResult> {
    let result_id: String = row.get("result_id");
    let run_id: String = row.get("run_id");
    let phase_id: String = row.get("phase_id");
    let run_type: String = row.get("run_type");
    let status: String = row.get("status");
    let result: Option<String> = row.get("result");

    Ok(RunResult {
        result_id: parse_uuid(&result_id, "result_id")?,
        run_id: parse_uuid(&run_id, "run_id")?,
        phase_id: parse_uuid(&phase_id, "phase_id")?,
        phase_number: row.get::<i64, _>("phase_number") as u8,
        run_type: parse_enum(&run_type)?,
        ordinal: row.get::<i64, _>("ordinal") as u32,
        status: parse_enum(&status)?,
        prompt: row.get("prompt"),
        result: result
            .map(|json| serde_json::from_str::<UnitFindings>(&json))
            .transpose()?,
        error: row.get("error"),
        started_at: parse_opt_timestamp(row.get("started_at"), "started_at")?,
        completed_at: parse_opt_timestamp(row.get("completed_at"), "completed_at")?,
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|d| d.max(0) as u64),
        cost_usd: row.get("cost_usd"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
    })
}

/// pending → running; `false` if the unit was not pending or the run is terminal
pub async fn mark_running(pool: &SqlitePool, result_id: Uuid) -> Result<bool> {
    let sql = format!(
        "UPDATE run_results
         SET status = 'running', started_at = ?
         WHERE result_id = ? AND status = 'pending'
           AND EXISTS (
               SELECT 1 FROM analysis_runs r
               WHERE r.run_id = run_results.run_id AND r.status NOT IN {}
           )",
        RunStatus::TERMINAL_SQL
    );
    let result = sqlx::query(&sql)
        .bind(now_rfc3339())
        .bind(result_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Terminal outcome of one unit, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalUnit {
    pub result: std::result::Result<UnitFindings, String>,
    pub prompt: Option<String>,
    pub duration_ms: u64,
    pub cost_usd: Option<f64>,
    /// Attempts beyond the first made for this execution
    pub extra_attempts: u32,
}

impl TerminalUnit {
    pub fn status(&self) -> UnitStatus {
        if self.result.is_ok() {
            UnitStatus::Completed
        } else {
            UnitStatus::Failed
        }
    }
}

/// running → completed/failed and bump the owning phase's counter
///
/// Returns the phase counts after the write, or `None` when the result was
/// discarded (unit no longer running, or run already terminal).
pub async fn record_terminal(
    pool: &SqlitePool,
    result_id: Uuid,
    unit: &TerminalUnit,
) -> Result<Option<PhaseCounts>> {
    let status = unit.status();
    let (result_json, error) = match &unit.result {
        Ok(findings) => (Some(serde_json::to_string(findings)?), None),
        Err(message) => (None, Some(message.clone())),
    };
    let (completed_inc, failed_inc) = match status {
        UnitStatus::Completed => (1i64, 0i64),
        _ => (0, 1),
    };
    let result_id = result_id.to_string();
    let (result_id, result_json, error) = (result_id.as_str(), result_json.as_deref(), error.as_deref());
    let max_wait_ms = settings::max_lock_wait_ms(pool).await?;

    retry_on_lock("record_terminal", max_wait_ms, || async move {
        let now = now_rfc3339();
        let mut tx = pool.begin().await?;

        let sql = format!(
            "UPDATE run_results
             SET status = ?, result = ?, error = ?, prompt = ?, completed_at = ?,
                 duration_ms = ?, cost_usd = ?, retry_count = retry_count + ?
             WHERE result_id = ? AND status = 'running'
               AND EXISTS (
                   SELECT 1 FROM analysis_runs r
                   WHERE r.run_id = run_results.run_id AND r.status NOT IN {}
               )",
            RunStatus::TERMINAL_SQL
        );
        let updated = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(result_json)
            .bind(error)
            .bind(unit.prompt.as_deref())
            .bind(&now)
            .bind(unit.duration_ms.min(i64::MAX as u64) as i64)
            .bind(unit.cost_usd)
            .bind(i64::from(unit.extra_attempts))
            .bind(result_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let phase_id: String = sqlx::query_scalar("SELECT phase_id FROM run_results WHERE result_id = ?")
            .bind(result_id)
            .fetch_one(&mut *tx)
            .await?;

        // CHECK (completed_runs + failed_runs <= total_runs) rejects overcounting
        sqlx::query(
            "UPDATE analysis_phases
             SET completed_runs = completed_runs + ?, failed_runs = failed_runs + ?
             WHERE phase_id = ?",
        )
        .bind(completed_inc)
        .bind(failed_inc)
        .bind(&phase_id)
        .execute(&mut *tx)
        .await?;

        let (total, completed, failed): (i64, i64, i64) = sqlx::query_as(
            "SELECT total_runs, completed_runs, failed_runs FROM analysis_phases WHERE phase_id = ?",
        )
        .bind(&phase_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(PhaseCounts {
            total_runs: total as u32,
            completed_runs: completed as u32,
            failed_runs: failed as u32,
        }))
    })
    .await
}

/// Reset units a dead worker left `running` so they execute again
///
/// The only backward unit transition (`running → pending`). Called when a run
/// starts executing, before any of its units start, so every `running` unit
/// found here belongs to a dead worker.
///
/// Returns the number of units reset.
pub async fn reset_running_for_resume(pool: &SqlitePool, run_id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE run_results
         SET status = 'pending', started_at = NULL, retry_count = retry_count + 1
         WHERE run_id = ? AND status = 'running'",
    )
    .bind(run_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
