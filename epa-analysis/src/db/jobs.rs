//! Durable job queue
//!
//! One job per run. Workers claim the oldest queued job atomically; a job left
//! `claimed` by a process that died is put back in the queue at startup.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;
use epa_common::Result;

use super::{now_rfc3339, parse_enum, parse_opt_timestamp, parse_timestamp, parse_uuid};
use crate::models::AnalysisJob;

pub(crate) async fn insert_job(
    conn: &mut SqliteConnection,
    job_id: Uuid,
    run_id: Uuid,
    created_at: &str,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO analysis_jobs (job_id, run_id, state, attempts, created_at)
         VALUES (?, ?, 'queued', 0, ?)",
    )
    .bind(job_id.to_string())
    .bind(run_id.to_string())
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

fn row_to_job(row: &SqliteRow) -> Result<AnalysisJob> {
    let job_id: String = row.get("job_id");
    let run_id: String = row.get("run_id");
    let state: String = row.get("state");
    let created_at: String = row.get("created_at");

    Ok(AnalysisJob {
        job_id: parse_uuid(&job_id, "job_id")?,
        run_id: parse_uuid(&run_id, "run_id")?,
        state: parse_enum(&state)?,
        attempts: row.get::<i64, _>("attempts") as u32,
        created_at: parse_timestamp(&created_at, "created_at")?,
        claimed_at: parse_opt_timestamp(row.get("claimed_at"), "claimed_at")?,
        finished_at: parse_opt_timestamp(row.get("finished_at"), "finished_at")?,
    })
}

/// Claim the oldest queued job, if any
pub async fn claim_next(pool: &SqlitePool) -> Result<Option<AnalysisJob>> {
    let row = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET state = 'claimed', claimed_at = ?, attempts = attempts + 1
        WHERE job_id = (
            SELECT job_id FROM analysis_jobs
            WHERE state = 'queued'
            ORDER BY created_at, job_id
            LIMIT 1
        )
        RETURNING job_id, run_id, state, attempts, created_at, claimed_at, finished_at
        "#,
    )
    .bind(now_rfc3339())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}

/// claimed → finished
pub async fn finish(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE analysis_jobs SET state = 'finished', finished_at = ?
         WHERE job_id = ? AND state = 'claimed'",
    )
    .bind(now_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Put every claimed job back in the queue
///
/// Only valid while no worker of this instance is running (startup). Returns
/// the run ids affected.
pub async fn requeue_stale(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE analysis_jobs SET state = 'queued', claimed_at = NULL
         WHERE state = 'claimed'
         RETURNING run_id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(|(id,)| parse_uuid(id, "run_id")).collect()
}

pub async fn load_job_for_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<AnalysisJob>> {
    let row = sqlx::query(
        "SELECT job_id, run_id, state, attempts, created_at, claimed_at, finished_at
         FROM analysis_jobs WHERE run_id = ?",
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_job).transpose()
}
