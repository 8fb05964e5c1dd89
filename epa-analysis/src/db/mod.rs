//! Database access for epa-analysis
//!
//! SQLite via sqlx. Timestamps are stored as RFC3339 TEXT, identifiers as
//! hyphenated UUID TEXT, enums by their `as_str` form and structured payloads
//! as JSON TEXT.

pub mod jobs;
pub mod phases;
pub mod reports;
pub mod run_results;
pub mod runs;
pub mod settings;

use chrono::{DateTime, Utc};
use epa_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "epa-analysis.db";

/// Open (creating if needed) the service database and initialize its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!(path = %db_path.display(), "Connecting to database");

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database (tests, dry runs)
///
/// Every connection to `sqlite::memory:` is a separate database, so the pool
/// must keep exactly one connection alive for its whole lifetime.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create epa-analysis tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_runs (
            run_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            client_id TEXT NOT NULL,
            status TEXT NOT NULL,
            overall_progress INTEGER NOT NULL DEFAULT 0
                CHECK (overall_progress BETWEEN 0 AND 100),
            current_phase INTEGER,
            intake TEXT NOT NULL,
            context TEXT NOT NULL,
            config TEXT NOT NULL,
            last_error TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            final_report_id TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            phase1_completed_at TEXT,
            phase2_completed_at TEXT,
            phase3_completed_at TEXT,
            completed_at TEXT,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_analysis_runs_owner_status ON analysis_runs(owner_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_phases (
            phase_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES analysis_runs(run_id) ON DELETE CASCADE,
            phase_number INTEGER NOT NULL CHECK (phase_number BETWEEN 1 AND 3),
            phase_type TEXT NOT NULL,
            status TEXT NOT NULL,
            total_runs INTEGER NOT NULL,
            completed_runs INTEGER NOT NULL DEFAULT 0,
            failed_runs INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            completed_at TEXT,
            aggregated_results TEXT,
            UNIQUE (run_id, phase_number),
            CHECK (completed_runs + failed_runs <= total_runs)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS run_results (
            result_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES analysis_runs(run_id) ON DELETE CASCADE,
            phase_id TEXT NOT NULL REFERENCES analysis_phases(phase_id) ON DELETE CASCADE,
            phase_number INTEGER NOT NULL,
            run_type TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            status TEXT NOT NULL,
            prompt TEXT,
            result TEXT,
            error TEXT,
            started_at TEXT,
            completed_at TEXT,
            duration_ms INTEGER,
            cost_usd REAL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE (phase_id, run_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_reports (
            report_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL UNIQUE REFERENCES analysis_runs(run_id) ON DELETE CASCADE,
            status TEXT NOT NULL,
            report TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            job_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL UNIQUE REFERENCES analysis_runs(run_id) ON DELETE CASCADE,
            state TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            claimed_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_analysis_jobs_state ON analysis_jobs(state, created_at)")
        .execute(pool)
        .await?;

    tracing::info!(
        "Database tables initialized (settings, analysis_runs, analysis_phases, run_results, analysis_reports, analysis_jobs)"
    );

    Ok(())
}

// Row decoding helpers shared by the table modules

pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_opt_timestamp(value: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(&v, column)).transpose()
}

pub(crate) fn parse_enum<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(Error::Internal)
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
