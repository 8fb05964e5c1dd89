//! Analysis run persistence
//!
//! Every status write is a compare-and-set on the current status so a write
//! computed against a stale view (late unit result, cancelled run) changes
//! nothing and reports `false`.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;
use epa_common::{Error, Result};

use super::{now_rfc3339, parse_enum, parse_opt_timestamp, parse_timestamp, parse_uuid};
use crate::db::{jobs, phases, run_results, settings};
use crate::models::{AnalysisRun, Phase, RunResult, RunStatus};
use crate::utils::retry_on_lock;

/// Result of an attempted run creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The owner already has a non-terminal run
    OwnerBusy(Uuid),
}

/// Atomically create a run, its three phases, every pending unit and the
/// queued job that will drive it
///
/// Single-flight is checked inside the same transaction.
pub async fn create_run_with_plan(
    pool: &SqlitePool,
    run: &AnalysisRun,
    phase_records: &[Phase],
    units: &[RunResult],
    job_id: Uuid,
) -> Result<CreateOutcome> {
    let intake = serde_json::to_string(&run.intake)?;
    let context = serde_json::to_string(&run.context)?;
    let config = serde_json::to_string(&run.config)?;
    let (intake, context, config) = (intake.as_str(), context.as_str(), config.as_str());
    let max_wait_ms = settings::max_lock_wait_ms(pool).await?;

    retry_on_lock("create_run_with_plan", max_wait_ms, || async move {
        let mut tx = pool.begin().await?;

        if let Some(existing) = active_run_for_owner_conn(&mut *tx, &run.owner_id).await? {
            return Ok(CreateOutcome::OwnerBusy(existing));
        }

        sqlx::query(
            r#"
            INSERT INTO analysis_runs (
                run_id, owner_id, client_id, status, overall_progress, current_phase,
                intake, context, config, last_error, retry_count, final_report_id,
                created_at, started_at, completed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, NULL, ?, NULL, NULL, ?)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.owner_id)
        .bind(&run.client_id)
        .bind(run.status.as_str())
        .bind(i64::from(run.overall_progress))
        .bind(run.current_phase.map(i64::from))
        .bind(intake)
        .bind(context)
        .bind(config)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for phase in phase_records {
            phases::insert_phase(&mut *tx, phase).await?;
        }
        for unit in units {
            run_results::insert_unit(&mut *tx, unit).await?;
        }
        jobs::insert_job(&mut *tx, job_id, run.run_id, &run.created_at.to_rfc3339()).await?;

        tx.commit().await?;
        Ok(CreateOutcome::Created)
    })
    .await
}

async fn active_run_for_owner_conn(conn: &mut SqliteConnection, owner_id: &str) -> Result<Option<Uuid>> {
    let sql = format!(
        "SELECT run_id FROM analysis_runs WHERE owner_id = ? AND status NOT IN {} LIMIT 1",
        RunStatus::TERMINAL_SQL
    );
    let row: Option<(String,)> = sqlx::query_as(&sql)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|(id,)| parse_uuid(&id, "run_id")).transpose()
}

/// Non-terminal run of an owner, if any
pub async fn active_run_for_owner(pool: &SqlitePool, owner_id: &str) -> Result<Option<Uuid>> {
    let mut conn = pool.acquire().await?;
    active_run_for_owner_conn(&mut conn, owner_id).await
}

/// Number of runs not yet terminal
pub async fn count_active_runs(pool: &SqlitePool) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM analysis_runs WHERE status NOT IN {}",
        RunStatus::TERMINAL_SQL
    );
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count)
}

pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<AnalysisRun>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, owner_id, client_id, status, overall_progress, current_phase,
               intake, context, config, last_error, retry_count, final_report_id,
               created_at, started_at, phase1_completed_at, phase2_completed_at,
               phase3_completed_at, completed_at, updated_at
        FROM analysis_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_run(&r)).transpose()
}

fn row_to_run(row: &SqliteRow) -> Result<AnalysisRun> {
    let run_id: String = row.get("run_id");
    let status: String = row.get("status");
    let intake: String = row.get("intake");
    let context: String = row.get("context");
    let config: String = row.get("config");
    let final_report_id: Option<String> = row.get("final_report_id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(AnalysisRun {
        run_id: parse_uuid(&run_id, "run_id")?,
        owner_id: row.get("owner_id"),
        client_id: row.get("client_id"),
        status: parse_enum(&status)?,
        overall_progress: row.get::<i64, _>("overall_progress").clamp(0, 100) as u8,
        current_phase: row.get::<Option<i64>, _>("current_phase").map(|p| p as u8),
        intake: serde_json::from_str(&intake)?,
        context: serde_json::from_str(&context)?,
        config: serde_json::from_str(&config)?,
        last_error: row.get("last_error"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        final_report_id: final_report_id
            .map(|id| parse_uuid(&id, "final_report_id"))
            .transpose()?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        started_at: parse_opt_timestamp(row.get("started_at"), "started_at")?,
        phase_completed_at: [
            parse_opt_timestamp(row.get("phase1_completed_at"), "phase1_completed_at")?,
            parse_opt_timestamp(row.get("phase2_completed_at"), "phase2_completed_at")?,
            parse_opt_timestamp(row.get("phase3_completed_at"), "phase3_completed_at")?,
        ],
        completed_at: parse_opt_timestamp(row.get("completed_at"), "completed_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
    })
}

/// Move a run from `from` to `to`, raising progress to at least `progress`
///
/// Returns `false` when the run was no longer in `from`. Terminal targets are
/// not accepted here: use [`fail_run`] or `reports::finalize_run`.
pub async fn transition_status(
    pool: &SqlitePool,
    run_id: Uuid,
    from: RunStatus,
    to: RunStatus,
    progress: u8,
) -> Result<bool> {
    if !from.can_transition_to(to) || to.is_terminal() {
        return Err(Error::Internal(format!(
            "illegal run transition {} -> {}",
            from, to
        )));
    }

    let now = now_rfc3339();
    let stamp_column = match to {
        RunStatus::Phase1Running => Some("started_at"),
        RunStatus::Phase1Complete => Some("phase1_completed_at"),
        RunStatus::Phase2Complete => Some("phase2_completed_at"),
        _ => None,
    };
    let stamp = stamp_column
        .map(|c| format!(", {c} = COALESCE({c}, ?)", c = c))
        .unwrap_or_default();

    let sql = format!(
        "UPDATE analysis_runs
         SET status = ?, current_phase = ?, overall_progress = MAX(overall_progress, ?),
             updated_at = ?{}
         WHERE run_id = ? AND status = ?",
        stamp
    );

    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(to.current_phase().map(i64::from))
        .bind(i64::from(progress.min(100)))
        .bind(&now);
    if stamp_column.is_some() {
        query = query.bind(&now);
    }
    let result = query
        .bind(run_id.to_string())
        .bind(from.as_str())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Raise overall progress; never lowers it and never touches a terminal run
pub async fn update_progress(pool: &SqlitePool, run_id: Uuid, progress: u8) -> Result<bool> {
    let sql = format!(
        "UPDATE analysis_runs
         SET overall_progress = MAX(overall_progress, ?), updated_at = ?
         WHERE run_id = ? AND status NOT IN {}",
        RunStatus::TERMINAL_SQL
    );
    let result = sqlx::query(&sql)
        .bind(i64::from(progress.min(100)))
        .bind(now_rfc3339())
        .bind(run_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Record that the run was picked up again after its worker died
pub async fn increment_retry_count(pool: &SqlitePool, run_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE analysis_runs SET retry_count = retry_count + 1, updated_at = ? WHERE run_id = ?")
        .bind(now_rfc3339())
        .bind(run_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Fail a non-terminal run and cascade to its records
///
/// Phases still pending or running become `failed`. Units still running become
/// `failed` (and are counted on their phase) so a late collaborator response
/// can no longer be applied. Pending units are left untouched.
///
/// Returns `false` when the run was already terminal.
pub async fn fail_run(pool: &SqlitePool, run_id: Uuid, error: &str) -> Result<bool> {
    let run_id = run_id.to_string();
    let run_id = run_id.as_str();
    let max_wait_ms = settings::max_lock_wait_ms(pool).await?;

    retry_on_lock("fail_run", max_wait_ms, || async move {
        let now = now_rfc3339();
        let mut tx = pool.begin().await?;

        let sql = format!(
            "UPDATE analysis_runs
             SET status = 'failed', last_error = ?, completed_at = ?, updated_at = ?
             WHERE run_id = ? AND status NOT IN {}",
            RunStatus::TERMINAL_SQL
        );
        let updated = sqlx::query(&sql)
            .bind(error)
            .bind(&now)
            .bind(&now)
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE analysis_phases
            SET failed_runs = failed_runs + (
                SELECT COUNT(*) FROM run_results r
                WHERE r.phase_id = analysis_phases.phase_id AND r.status = 'running'
            )
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE run_results SET status = 'failed', error = ?, completed_at = ?
             WHERE run_id = ? AND status = 'running'",
        )
        .bind(error)
        .bind(&now)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE analysis_phases SET status = 'failed', completed_at = ?
             WHERE run_id = ? AND status IN ('pending', 'running')",
        )
        .bind(&now)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    })
    .await
}

/// Sum of unit costs recorded for a run
pub async fn total_cost_usd(pool: &SqlitePool, run_id: Uuid) -> Result<f64> {
    let total: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(cost_usd), 0.0) FROM run_results WHERE run_id = ?",
    )
    .bind(run_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(total)
}

/// Seconds since the run started (or was created, if it never started)
pub fn elapsed_seconds(run: &AnalysisRun) -> u64 {
    let start = run.started_at.unwrap_or(run.created_at);
    let end = run.completed_at.unwrap_or_else(Utc::now);
    (end - start).num_seconds().max(0) as u64
}
