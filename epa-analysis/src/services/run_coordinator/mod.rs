//! Run coordinator
//!
//! Owns a run's lifecycle:
//!
//! ```text
//! pending → phase1_running → phase1_complete → phase2_running → phase2_complete
//!         → phase3_running → {completed | partial | failed}
//! ```
//!
//! Phases run strictly one after another. A phase transitions to
//! `phaseN_complete` only after every one of its units is terminal, and the
//! next phase receives the aggregates of all earlier phases.
//!
//! Any run-level fault (storage, aggregation, cancellation, run timeout) ends
//! the run in `failed` with the fault text as `last_error`; phases and units
//! still in flight are failed with it.
//!
//! Driving a run that was interrupted mid-way resumes it: completed phases are
//! skipped and their stored aggregates reused, terminal units are kept, units
//! left `running` execute again.

mod submission;
mod tracking;

pub use submission::SubmitError;
pub use tracking::phase_snapshot;

use chrono::Utc;
use epa_common::events::{AnalysisEvent, EventBus};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorSettings;
use crate::db;
use crate::error::OrchestrationError;
use crate::models::{AnalysisRun, ExecutionMode, PhaseAggregate, PhaseStatus, RunStatus, CANCELLED_ERROR};
use crate::services::aggregator::synthesize;
use crate::services::executor::WorkUnitExecutor;
use crate::services::phase_runner::{run_phase, PhaseInput};
use crate::services::progress::{band_start, progress};
use tracking::{emit_progress, emit_status_changed, ProgressTracker};

/// Cancellation tokens of runs currently being driven
pub type RunRegistry = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Nothing to cancel; the run had already ended in this status
    AlreadyTerminal(RunStatus),
}

pub struct RunCoordinator {
    db: SqlitePool,
    event_bus: EventBus,
    executor: Arc<WorkUnitExecutor>,
    phase2_concurrency: usize,
    unit_timeout_secs: u64,
    unit_max_retries: u32,
    run_timeout: Duration,
    registry: RunRegistry,
    /// Woken whenever a job is queued
    job_signal: Arc<Notify>,
}

impl RunCoordinator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        executor: Arc<WorkUnitExecutor>,
        settings: &OrchestratorSettings,
    ) -> Self {
        Self {
            db,
            event_bus,
            executor,
            phase2_concurrency: settings.phase2_concurrency,
            unit_timeout_secs: settings.unit_timeout_secs,
            unit_max_retries: settings.unit_max_retries,
            run_timeout: settings.run_timeout(),
            registry: Arc::new(RwLock::new(HashMap::new())),
            job_signal: Arc::new(Notify::new()),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn job_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.job_signal)
    }

    pub fn registry(&self) -> RunRegistry {
        Arc::clone(&self.registry)
    }

    /// Register a run as in flight and hand out its cancellation token
    pub async fn register_run(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.registry.write().await.insert(run_id, token.clone());
        token
    }

    pub async fn release_run(&self, run_id: Uuid) {
        self.registry.write().await.remove(&run_id);
    }

    /// Cancel a run
    ///
    /// The run fails with the cancellation error right away. In-flight
    /// collaborator calls are interrupted; whatever they return afterwards is
    /// discarded.
    pub async fn cancel(&self, run_id: Uuid) -> Result<CancelOutcome, OrchestrationError> {
        let run = db::runs::load_run(&self.db, run_id)
            .await?
            .ok_or(OrchestrationError::RunNotFound(run_id))?;
        if run.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(run.status));
        }

        let applied = self.fail_run(run_id, CANCELLED_ERROR, true).await?;

        if let Some(token) = self.registry.read().await.get(&run_id) {
            token.cancel();
        }

        if applied {
            Ok(CancelOutcome::Cancelled)
        } else {
            // Finished on its own between the load and the write
            let status = db::runs::load_run(&self.db, run_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(RunStatus::Failed);
            Ok(CancelOutcome::AlreadyTerminal(status))
        }
    }

    /// Drive a run to a terminal state
    ///
    /// Bounded by the run timeout. Run-level faults are recorded on the run;
    /// the returned status is the run's final status.
    pub async fn drive(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, OrchestrationError> {
        let outcome = match tokio::time::timeout(self.run_timeout, self.execute(run_id, cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrchestrationError::Timeout(self.run_timeout.as_secs())),
        };

        let err = match outcome {
            Ok(status) => return Ok(status),
            Err(OrchestrationError::RunNotFound(id)) => return Err(OrchestrationError::RunNotFound(id)),
            Err(err) => err,
        };

        let cancelled = matches!(err, OrchestrationError::Cancelled);
        if cancelled {
            info!(run_id = %run_id, "Run cancelled");
        } else {
            error!(run_id = %run_id, error = %err, "Run failed");
        }

        self.fail_run(run_id, &err.to_string(), cancelled).await?;

        let status = db::runs::load_run(&self.db, run_id)
            .await?
            .map(|r| r.status)
            .unwrap_or(RunStatus::Failed);
        Ok(status)
    }

    /// Run every phase in order and finalize, resuming where the run left off
    pub async fn execute(
        &self,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, OrchestrationError> {
        let run = self.load(run_id).await?;
        if run.is_terminal() {
            return Ok(run.status);
        }

        let reset = db::run_results::reset_running_for_resume(&self.db, run_id).await?;
        if run.status != RunStatus::Pending || reset > 0 {
            info!(
                run_id = %run_id,
                status = %run.status,
                units_reset = reset,
                retry_count = run.retry_count,
                "Resuming analysis run"
            );
        }

        let mut aggregates: Vec<PhaseAggregate> = Vec::with_capacity(3);
        for phase_number in 1..=3u8 {
            let aggregate = self.execute_phase(run_id, phase_number, &aggregates, cancel).await?;
            aggregates.push(aggregate);
        }

        self.finalize(run_id, &aggregates).await
    }

    /// Execute one phase behind the barrier of the previous one
    ///
    /// Moves the run into `phaseN_running`, runs every pending unit and, for
    /// phases 1 and 2, moves the run to `phaseN_complete`. A phase that already
    /// completed returns its stored aggregate without executing anything.
    pub async fn execute_phase(
        &self,
        run_id: Uuid,
        phase_number: u8,
        prior: &[PhaseAggregate],
        cancel: &CancellationToken,
    ) -> Result<PhaseAggregate, OrchestrationError> {
        let structural = |reason: &str| OrchestrationError::PhaseStructure {
            phase_number,
            reason: reason.to_string(),
        };

        let running = RunStatus::running(phase_number).ok_or_else(|| structural("no such phase"))?;
        let run = self.load(run_id).await?;
        if run.was_cancelled() {
            return Err(OrchestrationError::Cancelled);
        }

        let phase = db::phases::load_phase(&self.db, run_id, phase_number)
            .await?
            .ok_or_else(|| structural("phase record missing"))?;

        if run.status.has_completed_phase(phase_number) {
            return phase
                .aggregated_results
                .ok_or_else(|| structural("completed phase has no stored aggregate"));
        }

        if run.status != running {
            self.transition(run_id, run.status, running, band_start(phase_number)).await?;
        }

        let aggregate = if phase.status == PhaseStatus::Completed {
            phase
                .aggregated_results
                .clone()
                .ok_or_else(|| structural("completed phase has no stored aggregate"))?
        } else {
            let tracker = ProgressTracker::new(&self.db, &self.event_bus, band_start(phase_number));
            let input = PhaseInput {
                run_id,
                intake: &run.intake,
                context: &run.context,
                prior,
            };
            let mode = ExecutionMode::for_phase(phase_number, self.phase2_concurrency);
            run_phase(&self.db, &phase, &self.executor, mode, input, &tracker, cancel)
                .await?
                .aggregate
        };

        if let Some(complete) = RunStatus::complete(phase_number) {
            let done = progress(phase_number, phase.total_runs, phase.total_runs);
            self.transition(run_id, running, complete, done).await?;
        }

        Ok(aggregate)
    }

    /// Synthesize and persist the final report, ending the run
    /// `completed` or, when any unit failed, `partial`
    pub async fn finalize(
        &self,
        run_id: Uuid,
        aggregates: &[PhaseAggregate],
    ) -> Result<RunStatus, OrchestrationError> {
        let [phase1, phase2, phase3] = aggregates else {
            return Err(OrchestrationError::PhaseStructure {
                phase_number: 3,
                reason: format!("expected 3 phase aggregates, got {}", aggregates.len()),
            });
        };

        let report = synthesize(phase1, phase2, phase3);
        let status = if report.degraded {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let Some(report_id) = db::reports::finalize_run(&self.db, run_id, status, &report).await? else {
            return Err(self.refused(run_id, RunStatus::Phase3Running, status).await);
        };

        let run = self.load(run_id).await?;
        let duration_seconds = db::runs::elapsed_seconds(&run);

        info!(
            run_id = %run_id,
            status = %status,
            report_id = %report_id,
            score = report.score,
            failed_units = report.failed_units.len(),
            duration_seconds,
            "Analysis run finished"
        );

        emit_status_changed(&self.event_bus, run_id, RunStatus::Phase3Running, status);
        emit_progress(&self.db, &self.event_bus, run_id, 100, None).await;
        self.event_bus.emit_lossy(AnalysisEvent::RunFinished {
            run_id,
            status: status.as_str().to_string(),
            report_id,
            failed_units: report.failed_units.len() as u32,
            duration_seconds,
            timestamp: Utc::now(),
        });

        Ok(status)
    }

    /// Fail a live run and everything still in flight under it
    ///
    /// Returns `false` when the run was already terminal.
    async fn fail_run(
        &self,
        run_id: Uuid,
        message: &str,
        cancelled: bool,
    ) -> Result<bool, OrchestrationError> {
        let before = db::runs::load_run(&self.db, run_id).await?.map(|r| r.status);
        if !db::runs::fail_run(&self.db, run_id, message).await? {
            return Ok(false);
        }

        warn!(run_id = %run_id, error = message, cancelled, "Run marked failed");

        if let Some(before) = before {
            emit_status_changed(&self.event_bus, run_id, before, RunStatus::Failed);
        }
        self.event_bus.emit_lossy(AnalysisEvent::RunFailed {
            run_id,
            error_message: message.to_string(),
            cancelled,
            timestamp: Utc::now(),
        });
        Ok(true)
    }

    async fn transition(
        &self,
        run_id: Uuid,
        from: RunStatus,
        to: RunStatus,
        overall: u8,
    ) -> Result<(), OrchestrationError> {
        if !from.can_transition_to(to) {
            return Err(OrchestrationError::InvalidTransition { from, to });
        }

        if !db::runs::transition_status(&self.db, run_id, from, to, overall).await? {
            return Err(self.refused(run_id, from, to).await);
        }

        info!(run_id = %run_id, from = %from, to = %to, progress = overall, "Run status changed");
        emit_status_changed(&self.event_bus, run_id, from, to);
        emit_progress(&self.db, &self.event_bus, run_id, overall, to.current_phase()).await;
        Ok(())
    }

    /// Error for a status write that lost its compare-and-set
    async fn refused(&self, run_id: Uuid, from: RunStatus, to: RunStatus) -> OrchestrationError {
        match db::runs::load_run(&self.db, run_id).await {
            Ok(Some(run)) if run.was_cancelled() => OrchestrationError::Cancelled,
            Ok(Some(run)) => OrchestrationError::InvalidTransition { from: run.status, to },
            Ok(None) => OrchestrationError::RunNotFound(run_id),
            Err(e) => {
                warn!(run_id = %run_id, from = %from, to = %to, error = %e, "Failed to reload run");
                OrchestrationError::Storage(e)
            }
        }
    }

    async fn load(&self, run_id: Uuid) -> Result<AnalysisRun, OrchestrationError> {
        db::runs::load_run(&self.db, run_id)
            .await?
            .ok_or(OrchestrationError::RunNotFound(run_id))
    }
}
