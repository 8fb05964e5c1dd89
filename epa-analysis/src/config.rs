//! Configuration resolution for epa-analysis
//!
//! Multi-tier resolution per setting: Database → ENV (`EPA_<KEY>`) → TOML →
//! compiled default. The database tier is authoritative; a key present in more
//! than one tier is logged as a potential misconfiguration.

use epa_common::config::{OrchestratorToml, TomlConfig};
use epa_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::settings;

/// Resolved orchestrator settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Ceiling on simultaneously in-flight phase-2 units
    pub phase2_concurrency: usize,
    pub unit_timeout_secs: u64,
    pub run_timeout_secs: u64,
    /// Retries of a retryable unit failure (0 = no retry)
    pub unit_max_retries: u32,
    /// Linear backoff step between unit retries
    pub retry_backoff_ms: u64,
    pub worker_poll_interval_ms: u64,
    /// Base URL of the analysis collaborator (required by the binary)
    pub collaborator_url: Option<String>,
    pub collaborator_api_key: Option<String>,
    pub collaborator_requests_per_minute: u32,
    /// Per-owner submission allowance
    pub submissions_per_minute: u32,
    pub event_bus_capacity: usize,
    pub db_max_lock_wait_ms: u64,
    pub listen_port: u16,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            phase2_concurrency: 4,
            unit_timeout_secs: 300,
            run_timeout_secs: 3600,
            unit_max_retries: 1,
            retry_backoff_ms: 500,
            worker_poll_interval_ms: 1000,
            collaborator_url: None,
            collaborator_api_key: None,
            collaborator_requests_per_minute: 60,
            submissions_per_minute: 6,
            event_bus_capacity: 256,
            db_max_lock_wait_ms: settings::DEFAULT_MAX_LOCK_WAIT_MS,
            listen_port: 5740,
        }
    }
}

impl OrchestratorSettings {
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.phase2_concurrency == 0 {
            problems.push("phase2_concurrency must be at least 1");
        }
        if self.unit_timeout_secs == 0 {
            problems.push("unit_timeout_secs must be positive");
        }
        if self.run_timeout_secs < self.unit_timeout_secs {
            problems.push("run_timeout_secs must not be shorter than unit_timeout_secs");
        }
        if self.worker_poll_interval_ms == 0 {
            problems.push("worker_poll_interval_ms must be positive");
        }
        if self.collaborator_requests_per_minute == 0 {
            problems.push("collaborator_requests_per_minute must be at least 1");
        }
        if self.submissions_per_minute == 0 {
            problems.push("submissions_per_minute must be at least 1");
        }
        if self.event_bus_capacity == 0 {
            problems.push("event_bus_capacity must be at least 1");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}

/// Environment variable consulted for a setting key
pub fn env_var_name(key: &str) -> String {
    format!("EPA_{}", key.to_ascii_uppercase())
}

/// Resolve every orchestrator setting from the database, environment and TOML
pub async fn resolve_settings(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<OrchestratorSettings> {
    let t: &OrchestratorToml = &toml_config.orchestrator;
    let d = OrchestratorSettings::default();

    let resolved = OrchestratorSettings {
        phase2_concurrency: resolve(db, "phase2_concurrency", t.phase2_concurrency)
            .await?
            .unwrap_or(d.phase2_concurrency),
        unit_timeout_secs: resolve(db, "unit_timeout_secs", t.unit_timeout_secs)
            .await?
            .unwrap_or(d.unit_timeout_secs),
        run_timeout_secs: resolve(db, "run_timeout_secs", t.run_timeout_secs)
            .await?
            .unwrap_or(d.run_timeout_secs),
        unit_max_retries: resolve(db, "unit_max_retries", t.unit_max_retries)
            .await?
            .unwrap_or(d.unit_max_retries),
        retry_backoff_ms: resolve(db, "retry_backoff_ms", t.retry_backoff_ms)
            .await?
            .unwrap_or(d.retry_backoff_ms),
        worker_poll_interval_ms: resolve(db, "worker_poll_interval_ms", t.worker_poll_interval_ms)
            .await?
            .unwrap_or(d.worker_poll_interval_ms),
        collaborator_url: resolve(db, "collaborator_url", t.collaborator_url.clone())
            .await?
            .filter(|url: &String| !url.trim().is_empty()),
        collaborator_api_key: resolve(db, "collaborator_api_key", t.collaborator_api_key.clone())
            .await?
            .filter(|key: &String| !key.trim().is_empty()),
        collaborator_requests_per_minute: resolve(
            db,
            "collaborator_requests_per_minute",
            t.collaborator_requests_per_minute,
        )
        .await?
        .unwrap_or(d.collaborator_requests_per_minute),
        submissions_per_minute: resolve(db, "submissions_per_minute", t.submissions_per_minute)
            .await?
            .unwrap_or(d.submissions_per_minute),
        event_bus_capacity: resolve(db, "event_bus_capacity", t.event_bus_capacity)
            .await?
            .unwrap_or(d.event_bus_capacity),
        db_max_lock_wait_ms: resolve(db, settings::DB_MAX_LOCK_WAIT_MS, t.db_max_lock_wait_ms)
            .await?
            .unwrap_or(d.db_max_lock_wait_ms),
        listen_port: resolve(db, "listen_port", t.listen_port)
            .await?
            .unwrap_or(d.listen_port),
    };

    resolved.validate()?;
    Ok(resolved)
}

/// Resolve one key: Database → ENV → TOML
async fn resolve<T>(db: &Pool<Sqlite>, key: &str, toml_value: Option<T>) -> Result<Option<T>>
where
    T: FromStr + Display,
    T::Err: Display,
{
    let db_value = settings::get_setting::<T>(db, key).await?;

    let env_name = env_var_name(key);
    let env_value = match std::env::var(&env_name) {
        Ok(raw) if !raw.trim().is_empty() => Some(
            raw.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("{} is invalid: {}", env_name, e)))?,
        ),
        _ => None,
    };

    let mut sources = Vec::new();
    if db_value.is_some() {
        sources.push("database");
    }
    if env_value.is_some() {
        sources.push("environment");
    }
    if toml_value.is_some() {
        sources.push("TOML");
    }
    if sources.len() > 1 {
        warn!(
            setting = key,
            "Setting found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    let value = db_value.or(env_value).or(toml_value);
    if let Some(source) = sources.first() {
        debug!(setting = key, source, "Setting resolved");
    }
    Ok(value)
}
