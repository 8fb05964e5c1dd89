//! Phase runner
//!
//! Executes every pending unit of one phase, sequentially or with bounded
//! parallelism, records each terminal state as it arrives and folds the
//! phase's units into its aggregate.
//!
//! Unit failures stay inside the phase: they are recorded, counted and the
//! remaining units keep running. Only structural faults, storage faults and
//! cancellation end the phase early.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db;
use crate::db::run_results::TerminalUnit;
use crate::error::OrchestrationError;
use crate::models::{
    ClientContext, ExecutionMode, ParsedIntake, Phase, PhaseAggregate, PhaseCounts,
    PhaseStatus, RunResult, RunType, UnitOutcome, UnitStatus,
};
use crate::services::aggregator::aggregate;
use crate::services::executor::{AnalysisRequest, UnitError, UnitExecution, WorkUnitExecutor};

/// Notification sent after each unit's terminal state was recorded
#[derive(Debug, Clone, Copy)]
pub struct UnitDone<'a> {
    pub phase_number: u8,
    pub run_type: RunType,
    /// `None` for a completed unit
    pub error: Option<&'a str>,
    /// Phase counters including this unit
    pub counts: PhaseCounts,
}

/// Receives a tick after every unit so overall progress can be recomputed
#[async_trait]
pub trait UnitProgressListener: Send + Sync {
    async fn on_unit_done(&self, run_id: Uuid, done: UnitDone<'_>);
}

/// Listener that ignores ticks
pub struct NoopListener;

#[async_trait]
impl UnitProgressListener for NoopListener {
    async fn on_unit_done(&self, _run_id: Uuid, _done: UnitDone<'_>) {}
}

/// Read-only inputs shared by every unit of the phase
#[derive(Clone, Copy)]
pub struct PhaseInput<'a> {
    pub run_id: Uuid,
    pub intake: &'a ParsedIntake,
    pub context: &'a ClientContext,
    /// Aggregates of earlier phases, in phase order
    pub prior: &'a [PhaseAggregate],
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub aggregate: PhaseAggregate,
    pub counts: PhaseCounts,
}

/// Run one phase to completion
///
/// Units already terminal (resumed run) are kept as they are; only `pending`
/// units execute. The phase ends `completed` once every unit is terminal.
pub async fn run_phase(
    pool: &SqlitePool,
    phase: &Phase,
    executor: &WorkUnitExecutor,
    mode: ExecutionMode,
    input: PhaseInput<'_>,
    listener: &dyn UnitProgressListener,
    cancel: &CancellationToken,
) -> Result<PhaseOutcome, OrchestrationError> {
    let phase_number = phase.phase_number;
    let structural = |reason: String| OrchestrationError::PhaseStructure { phase_number, reason };

    let units = db::run_results::load_phase_units(pool, phase.phase_id).await?;
    if units.len() as u32 != phase.total_runs {
        return Err(structural(format!(
            "{} unit records for {} applicable units",
            units.len(),
            phase.total_runs
        )));
    }
    if let Some(stray) = units.iter().find(|u| u.run_type.phase_number() != phase_number) {
        return Err(structural(format!("unit {} belongs to another phase", stray.run_type)));
    }

    if !db::phases::mark_running(pool, phase.phase_id).await? {
        return Err(halted(pool, input.run_id, phase_number, cancel).await);
    }

    let pending: Vec<RunResult> = units
        .into_iter()
        .filter(|u| u.status == UnitStatus::Pending)
        .collect();

    info!(
        run_id = %input.run_id,
        phase = phase_number,
        total = phase.total_runs,
        pending = pending.len(),
        concurrency = mode.limit(),
        "Phase started"
    );

    // Units record their own outcome: the loop body must not wait on the pool
    // while buffered units hold connections.
    let mut executions = stream::iter(pending.into_iter().map(|unit| {
        run_unit(pool, phase_number, unit, executor, input, listener, cancel)
    }))
    .buffer_unordered(mode.limit());

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            next = executions.next() => next,
        };
        match next {
            Some(done) => done?,
            None => break,
        }
    }

    let units = db::run_results::load_phase_units(pool, phase.phase_id).await?;
    let mut outcomes = Vec::with_capacity(units.len());
    for unit in units {
        let result = match (unit.status, unit.result) {
            (UnitStatus::Completed, Some(findings)) => Ok(findings),
            (UnitStatus::Completed, None) => {
                return Err(structural(format!("completed unit {} has no result", unit.run_type)))
            }
            (UnitStatus::Failed, _) => Err(unit.error.unwrap_or_default()),
            (status, _) => {
                return Err(structural(format!(
                    "unit {} still {} after phase drained",
                    unit.run_type,
                    status.as_str()
                )))
            }
        };
        outcomes.push(UnitOutcome {
            run_type: unit.run_type,
            ordinal: unit.ordinal,
            result,
        });
    }

    let aggregate = aggregate(phase_number, &outcomes)?;

    if !db::phases::complete_phase(pool, phase.phase_id, &aggregate).await? {
        return Err(halted(pool, input.run_id, phase_number, cancel).await);
    }

    let counts = db::phases::load_counts(pool, phase.phase_id)
        .await?
        .unwrap_or(PhaseCounts {
            total_runs: phase.total_runs,
            completed_runs: 0,
            failed_runs: 0,
        });

    info!(
        run_id = %input.run_id,
        phase = phase_number,
        completed = counts.completed_runs,
        failed = counts.failed_runs,
        "Phase completed"
    );

    Ok(PhaseOutcome { aggregate, counts })
}

/// Start, execute and record one pending unit
async fn run_unit(
    pool: &SqlitePool,
    phase_number: u8,
    unit: RunResult,
    executor: &WorkUnitExecutor,
    input: PhaseInput<'_>,
    listener: &dyn UnitProgressListener,
    cancel: &CancellationToken,
) -> Result<(), OrchestrationError> {
    if !db::run_results::mark_running(pool, unit.result_id).await? {
        // The run went terminal underneath us
        return Err(halted(pool, input.run_id, phase_number, cancel).await);
    }
    debug!(run_id = %input.run_id, phase = phase_number, run_type = %unit.run_type, "Unit started");

    let request = AnalysisRequest {
        run_id: input.run_id,
        run_type: unit.run_type,
        intake: input.intake,
        context: input.context,
        prior: input.prior,
    };
    let execution = executor.execute(&request, cancel).await;
    if matches!(execution.result, Err(UnitError::Cancelled)) {
        return Err(OrchestrationError::Cancelled);
    }

    record_unit(pool, phase_number, &unit, execution, input.run_id, listener, cancel).await
}

async fn record_unit(
    pool: &SqlitePool,
    phase_number: u8,
    unit: &RunResult,
    execution: UnitExecution,
    run_id: Uuid,
    listener: &dyn UnitProgressListener,
    cancel: &CancellationToken,
) -> Result<(), OrchestrationError> {
    let UnitExecution { result, metadata } = execution;
    let terminal = TerminalUnit {
        result: result.map_err(|e| e.to_string()),
        prompt: metadata.prompt,
        duration_ms: metadata.duration_ms,
        cost_usd: metadata.cost_usd,
        extra_attempts: metadata.attempts.saturating_sub(1),
    };

    let Some(counts) = db::run_results::record_terminal(pool, unit.result_id, &terminal).await? else {
        warn!(
            run_id = %run_id,
            phase = phase_number,
            run_type = %unit.run_type,
            "Discarding late unit result: run no longer accepts writes"
        );
        return Err(halted(pool, run_id, phase_number, cancel).await);
    };

    let error = terminal.result.as_ref().err().map(String::as_str);
    match error {
        None => info!(
            run_id = %run_id,
            phase = phase_number,
            run_type = %unit.run_type,
            duration_ms = terminal.duration_ms,
            "Unit completed"
        ),
        Some(message) => warn!(
            run_id = %run_id,
            phase = phase_number,
            run_type = %unit.run_type,
            attempts = metadata.attempts,
            error = message,
            "Unit failed"
        ),
    }

    listener
        .on_unit_done(
            run_id,
            UnitDone {
                phase_number,
                run_type: unit.run_type,
                error,
                counts,
            },
        )
        .await;

    Ok(())
}

/// Error for a phase whose writes were refused
async fn halted(
    pool: &SqlitePool,
    run_id: Uuid,
    phase_number: u8,
    cancel: &CancellationToken,
) -> OrchestrationError {
    if cancel.is_cancelled() {
        return OrchestrationError::Cancelled;
    }
    match db::runs::load_run(pool, run_id).await {
        Ok(Some(run)) if run.was_cancelled() => OrchestrationError::Cancelled,
        Ok(Some(run)) if run.is_terminal() => OrchestrationError::PhaseStructure {
            phase_number,
            reason: format!("run already {}", run.status),
        },
        Ok(Some(_)) => match db::phases::load_phase(pool, run_id, phase_number).await {
            Ok(Some(phase)) if phase.status == PhaseStatus::Failed => OrchestrationError::PhaseStructure {
                phase_number,
                reason: "phase already failed".to_string(),
            },
            Ok(_) => OrchestrationError::PhaseStructure {
                phase_number,
                reason: "phase records refused the update".to_string(),
            },
            Err(e) => OrchestrationError::Storage(e),
        },
        Ok(None) => OrchestrationError::RunNotFound(run_id),
        Err(e) => OrchestrationError::Storage(e),
    }
}
