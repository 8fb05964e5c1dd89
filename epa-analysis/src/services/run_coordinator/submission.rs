//! Run creation: applicability up front, then one atomic write of the run,
//! its three phases, every pending unit and the queued job

use chrono::Utc;
use epa_common::events::AnalysisEvent;
use std::collections::HashSet;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::RunCoordinator;
use crate::db;
use crate::db::runs::CreateOutcome;
use crate::models::{
    AnalysisRun, ClientContext, ParsedIntake, Phase, PhaseStatus, PhaseType, RunConfig,
    RunResult, RunStatus, RunType, UnitStatus,
};
use crate::services::applicability::select_all_phases;

const PHASE_TYPES: [PhaseType; 3] = [PhaseType::Research, PhaseType::Analysis, PhaseType::Synthesis];

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid submission: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("owner {owner_id} already has active run {run_id}")]
    Conflict { owner_id: String, run_id: Uuid },

    #[error(transparent)]
    Storage(#[from] epa_common::Error),
}

impl RunCoordinator {
    /// Accept an intake and queue its run
    ///
    /// Returns as soon as the run is persisted; nothing has executed yet.
    pub async fn submit(
        &self,
        owner_id: &str,
        client_id: &str,
        intake: ParsedIntake,
    ) -> Result<Uuid, SubmitError> {
        let mut problems = Vec::new();
        if owner_id.trim().is_empty() {
            problems.push("owner_id is required".to_string());
        }
        if client_id.trim().is_empty() {
            problems.push("client_id is required".to_string());
        }
        if let Err(intake_problems) = intake.validate() {
            problems.extend(intake_problems);
        }
        if !problems.is_empty() {
            return Err(SubmitError::Invalid(problems));
        }

        let context = ClientContext::new(owner_id.trim(), client_id.trim(), &intake);
        let phase_units = select_all_phases(&context, &intake);
        self.create_run(context, intake, phase_units).await
    }

    /// Persist a run for an explicit unit plan
    ///
    /// `phase_units[i]` lists the unit types of phase `i + 1` in execution order.
    pub async fn create_run(
        &self,
        context: ClientContext,
        intake: ParsedIntake,
        phase_units: [Vec<RunType>; 3],
    ) -> Result<Uuid, SubmitError> {
        validate_plan(&phase_units)?;

        let now = Utc::now();
        let run_id = Uuid::new_v4();
        let job_id = Uuid::new_v4();

        let mut phases = Vec::with_capacity(3);
        let mut units = Vec::new();
        for ((index, run_types), phase_type) in phase_units.iter().enumerate().zip(PHASE_TYPES) {
            let phase = Phase {
                phase_id: Uuid::new_v4(),
                run_id,
                phase_number: index as u8 + 1,
                phase_type,
                status: PhaseStatus::Pending,
                total_runs: run_types.len() as u32,
                completed_runs: 0,
                failed_runs: 0,
                started_at: None,
                completed_at: None,
                aggregated_results: None,
            };
            units.extend(run_types.iter().enumerate().map(|(ordinal, &run_type)| RunResult {
                result_id: Uuid::new_v4(),
                run_id,
                phase_id: phase.phase_id,
                phase_number: phase.phase_number,
                run_type,
                ordinal: ordinal as u32,
                status: UnitStatus::Pending,
                prompt: None,
                result: None,
                error: None,
                started_at: None,
                completed_at: None,
                duration_ms: None,
                cost_usd: None,
                retry_count: 0,
            }));
            phases.push(phase);
        }

        let run = AnalysisRun {
            run_id,
            owner_id: context.owner_id.clone(),
            client_id: context.client_id.clone(),
            status: RunStatus::Pending,
            overall_progress: 0,
            current_phase: None,
            context,
            intake,
            config: RunConfig {
                phase_units,
                phase2_concurrency: self.phase2_concurrency,
                unit_timeout_secs: self.unit_timeout_secs,
                run_timeout_secs: self.run_timeout.as_secs(),
                unit_max_retries: self.unit_max_retries,
            },
            last_error: None,
            retry_count: 0,
            final_report_id: None,
            created_at: now,
            started_at: None,
            phase_completed_at: [None; 3],
            completed_at: None,
            updated_at: now,
        };

        match db::runs::create_run_with_plan(&self.db, &run, &phases, &units, job_id).await? {
            CreateOutcome::Created => {}
            CreateOutcome::OwnerBusy(existing) => {
                info!(
                    owner_id = %run.owner_id,
                    active_run = %existing,
                    "Submission rejected: owner already has an active run"
                );
                return Err(SubmitError::Conflict {
                    owner_id: run.owner_id,
                    run_id: existing,
                });
            }
        }

        info!(
            run_id = %run_id,
            owner_id = %run.owner_id,
            phase1_units = phases[0].total_runs,
            phase2_units = phases[1].total_runs,
            phase3_units = phases[2].total_runs,
            "Analysis run queued"
        );

        self.event_bus.emit_lossy(AnalysisEvent::RunSubmitted {
            run_id,
            owner_id: run.owner_id,
            timestamp: now,
        });
        self.job_signal.notify_one();

        Ok(run_id)
    }
}

fn validate_plan(phase_units: &[Vec<RunType>; 3]) -> Result<(), SubmitError> {
    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    for (index, run_types) in phase_units.iter().enumerate() {
        let phase_number = index as u8 + 1;
        for &run_type in run_types {
            if run_type.phase_number() != phase_number {
                problems.push(format!("{} cannot run in phase {}", run_type, phase_number));
            }
            if !seen.insert(run_type) {
                problems.push(format!("{} listed more than once", run_type));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(SubmitError::Invalid(problems))
    }
}
