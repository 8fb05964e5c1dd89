//! Final report persistence

use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use epa_common::{Error, Result};

use super::{now_rfc3339, parse_enum, parse_timestamp, parse_uuid, settings};
use crate::models::{FinalReport, RunStatus, StoredReport};
use crate::utils::retry_on_lock;

/// Persist the report and move the run from `phase3_running` to `status`
///
/// Report insert, back-reference and terminal transition commit together.
/// Returns `None` (and writes nothing) when the run left `phase3_running`
/// in the meantime, e.g. because it was cancelled.
pub async fn finalize_run(
    pool: &SqlitePool,
    run_id: Uuid,
    status: RunStatus,
    report: &FinalReport,
) -> Result<Option<Uuid>> {
    if !matches!(status, RunStatus::Completed | RunStatus::Partial) {
        return Err(Error::Internal(format!(
            "cannot finalize run {} as {}",
            run_id, status
        )));
    }

    let report_id = Uuid::new_v4();
    let report_json = serde_json::to_string(report)?;
    let (run_id_str, report_id_str) = (run_id.to_string(), report_id.to_string());
    let (run_id_str, report_id_str, report_json) =
        (run_id_str.as_str(), report_id_str.as_str(), report_json.as_str());
    let max_wait_ms = settings::max_lock_wait_ms(pool).await?;

    retry_on_lock("finalize_run", max_wait_ms, || async move {
        let now = now_rfc3339();
        let mut tx = pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE analysis_runs
             SET status = ?, final_report_id = ?, overall_progress = 100, current_phase = NULL,
                 phase3_completed_at = ?, completed_at = ?, updated_at = ?
             WHERE run_id = ? AND status = 'phase3_running'",
        )
        .bind(status.as_str())
        .bind(report_id_str)
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .bind(run_id_str)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query(
            "INSERT INTO analysis_reports (report_id, run_id, status, report, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(report_id_str)
        .bind(run_id_str)
        .bind(status.as_str())
        .bind(report_json)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(report_id))
    })
    .await
}

pub async fn load_report(pool: &SqlitePool, run_id: Uuid) -> Result<Option<StoredReport>> {
    let row = sqlx::query(
        "SELECT report_id, run_id, status, report, created_at FROM analysis_reports WHERE run_id = ?",
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let report_id: String = row.get("report_id");
    let run_id: String = row.get("run_id");
    let status: String = row.get("status");
    let report: String = row.get("report");
    let created_at: String = row.get("created_at");

    Ok(Some(StoredReport {
        report_id: parse_uuid(&report_id, "report_id")?,
        run_id: parse_uuid(&run_id, "run_id")?,
        status: parse_enum(&status)?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        report: serde_json::from_str(&report)?,
    }))
}
