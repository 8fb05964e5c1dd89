//! Run coordinator integration tests
//!
//! Drives runs end-to-end against an in-memory database and a scripted
//! collaborator: phase barrier, partial results, cancellation, timeouts,
//! retries and progress reporting.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use epa_analysis::db;
use epa_analysis::error::OrchestrationError;
use epa_analysis::models::{PhaseStatus, RunStatus, RunType, UnitStatus, CANCELLED_ERROR};
use epa_analysis::services::{CancelOutcome, RunCoordinator};
use epa_common::events::AnalysisEvent;
use helpers::*;
use tokio::sync::broadcast;
use uuid::Uuid;

async fn drive(coordinator: &RunCoordinator, run_id: Uuid) -> RunStatus {
    let cancel = coordinator.register_run(run_id).await;
    let status = coordinator.drive(run_id, &cancel).await.unwrap();
    coordinator.release_run(run_id).await;
    status
}

fn drain_events(rx: &mut broadcast::Receiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_happy_path_completes_with_report() {
    // Given: a run with two research, three analysis and three synthesis units
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new());
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When: the run is driven
    let status = drive(&coordinator, run_id).await;

    // Then: it completes with a stored report and every unit completed
    assert_eq!(status, RunStatus::Completed);

    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.overall_progress, 100);
    assert_eq!(run.current_phase, None);
    assert!(run.last_error.is_none());
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert!(run.phase_completed_at.iter().all(|t| t.is_some()));

    let report = db::reports::load_report(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(Some(report.report_id), run.final_report_id);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.report.score, 72);
    assert!(!report.report.degraded);
    assert!(report.report.failed_units.is_empty());
    // Shared recommendation from three phase-2 units is merged once
    assert_eq!(report.report.recommendations.len(), 1);

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    assert_eq!(units.len(), 8);
    assert!(units.iter().all(|u| u.status == UnitStatus::Completed));
    assert!(units.iter().all(|u| u.cost_usd == Some(0.25)));

    let phases = db::phases::load_phases(&pool, run_id).await.unwrap();
    assert!(phases.iter().all(|p| p.status == PhaseStatus::Completed));
    assert!(phases.iter().all(|p| p.aggregated_results.is_some()));

    let cost = db::runs::total_cost_usd(&pool, run_id).await.unwrap();
    assert!((cost - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_phases_run_behind_a_barrier() {
    // Given: slow collaborator calls
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().with_delay(Duration::from_millis(20)));
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    drive(&coordinator, run_id).await;

    // Then: every unit of phase N finished before any unit of phase N+1 started
    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    for phase in 1..3u8 {
        let last_finished = units
            .iter()
            .filter(|u| u.phase_number == phase)
            .filter_map(|u| u.completed_at)
            .max()
            .unwrap();
        let first_started = units
            .iter()
            .filter(|u| u.phase_number == phase + 1)
            .filter_map(|u| u.started_at)
            .min()
            .unwrap();
        assert!(
            last_finished <= first_started,
            "phase {} overlapped phase {}",
            phase,
            phase + 1
        );
    }

    // Phase membership of the call log is contiguous
    let phases: Vec<u8> = collaborator.calls().iter().map(|t| t.phase_number()).collect();
    let mut sorted = phases.clone();
    sorted.sort();
    assert_eq!(phases, sorted);

    // Phase 1 and 3 run one at a time in applicability order
    let calls = collaborator.calls();
    assert_eq!(&calls[..2], &[RunType::DocumentInventory, RunType::AssetReview]);
    assert_eq!(
        &calls[5..],
        &[RunType::GapAnalysis, RunType::Recommendations, RunType::ExecutiveSummary]
    );
}

#[tokio::test]
async fn test_phase2_concurrency_is_bounded() {
    // Given: a ceiling of two parallel phase-2 units
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().with_delay(Duration::from_millis(50)));
    let settings = epa_analysis::config::OrchestratorSettings {
        phase2_concurrency: 2,
        ..test_settings()
    };
    let coordinator = build_coordinator(&pool, collaborator.clone(), &settings);
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: phase 2 ran in parallel but never above the ceiling
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(collaborator.max_in_flight(), 2);
}

#[tokio::test]
async fn test_phase2_with_more_units_than_concurrency() {
    // Given: a submitted run whose analysis phase outnumbers the ceiling of three
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().with_delay(Duration::from_millis(20)));
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = coordinator
        .submit("owner-a", "client-1", sample_intake())
        .await
        .unwrap();
    let phase2 = db::phases::load_phase(&pool, run_id, 2).await.unwrap().unwrap();
    assert!(phase2.total_runs > 3);

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: every queued unit got a slot and the run completed
    assert_eq!(status, RunStatus::Completed);
    let phase2 = db::phases::load_phase(&pool, run_id, 2).await.unwrap().unwrap();
    assert_eq!(phase2.completed_runs, phase2.total_runs);
    assert!(collaborator.max_in_flight() <= 3);

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    assert!(units.iter().all(|u| u.status == UnitStatus::Completed));
    assert!(db::reports::load_report(&pool, run_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_wide_phase2_on_file_database() {
    // Given: ten analysis units and a ceiling above the file pool's connection count
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_database_pool(&dir.path().join(db::DATABASE_FILE)).await.unwrap();
    let collaborator = Arc::new(ScriptedCollaborator::new().with_delay(Duration::from_millis(20)));
    let settings = epa_analysis::config::OrchestratorSettings {
        phase2_concurrency: 10,
        ..test_settings()
    };
    let coordinator = build_coordinator(&pool, collaborator.clone(), &settings);
    let intake = sample_intake();
    let context = epa_analysis::models::ClientContext::new("owner-a", "client-1", &intake);
    let run_id = coordinator.create_run(context, intake, full_plan()).await.unwrap();

    // When
    let status = drive(&coordinator, run_id).await;

    // Then
    assert_eq!(status, RunStatus::Completed);
    let phase2 = db::phases::load_phase(&pool, run_id, 2).await.unwrap().unwrap();
    assert_eq!(phase2.total_runs, 10);
    assert_eq!(phase2.completed_runs, 10);
    assert_eq!(collaborator.calls().len(), RunType::ALL.len());
}

#[tokio::test]
async fn test_failed_unit_yields_partial_run() {
    // Given: estate tax analysis is rejected by the collaborator
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().failing(RunType::EstateTax));
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: the run still finishes, flagged partial
    assert_eq!(status, RunStatus::Partial);

    let phase2 = db::phases::load_phase(&pool, run_id, 2).await.unwrap().unwrap();
    assert_eq!(phase2.status, PhaseStatus::Completed);
    assert_eq!(phase2.total_runs, 3);
    assert_eq!(phase2.completed_runs, 2);
    assert_eq!(phase2.failed_runs, 1);
    let aggregate = phase2.aggregated_results.unwrap();
    assert_eq!(aggregate.failed_units, vec![RunType::EstateTax]);
    assert_eq!(aggregate.units.len(), 2);

    // Non-retryable failure is not retried
    assert_eq!(collaborator.call_count(RunType::EstateTax), 1);

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    let estate_tax = units.iter().find(|u| u.run_type == RunType::EstateTax).unwrap();
    assert_eq!(estate_tax.status, UnitStatus::Failed);
    assert!(estate_tax.error.as_deref().unwrap().contains("estate_tax could not be analyzed"));
    assert!(estate_tax.result.is_none());

    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.overall_progress, 100);
    assert!(run.last_error.is_none());

    let report = db::reports::load_report(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Partial);
    assert!(report.report.degraded);
    assert_eq!(report.report.failed_units, vec![RunType::EstateTax]);
}

#[tokio::test]
async fn test_phase2_reaches_band_end_with_a_failure() {
    // Given: one of three phase-2 units fails
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().failing(RunType::MedicaidPlanning));
    let coordinator = build_coordinator(&pool, collaborator, &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;
    let cancel = coordinator.register_run(run_id).await;

    // When: only phases 1 and 2 execute
    let phase1 = coordinator.execute_phase(run_id, 1, &[], &cancel).await.unwrap();

    // Both research units completed: phase 1 band is full
    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Phase1Complete);
    assert_eq!(run.overall_progress, 30);
    let counts = db::phases::load_phase(&pool, run_id, 1).await.unwrap().unwrap();
    assert_eq!((counts.completed_runs, counts.failed_runs), (2, 0));

    let phase2 = coordinator
        .execute_phase(run_id, 2, std::slice::from_ref(&phase1), &cancel)
        .await
        .unwrap();

    // Then: failed units count toward progress like completed ones
    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Phase2Complete);
    assert_eq!(run.overall_progress, 70);
    assert_eq!(phase2.failed_units, vec![RunType::MedicaidPlanning]);
}

#[tokio::test]
async fn test_no_applicable_phase2_units() {
    // Given: an intake for which no analysis unit applies
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new());
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = coordinator
        .submit("owner-a", "client-1", no_phase2_intake())
        .await
        .unwrap();
    let mut rx = coordinator.event_bus().subscribe();

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: phase 2 completes immediately and progress jumps 30 -> 70
    assert_eq!(status, RunStatus::Completed);
    assert!(collaborator.calls().iter().all(|t| t.phase_number() != 2));

    let phase2 = db::phases::load_phase(&pool, run_id, 2).await.unwrap().unwrap();
    assert_eq!(phase2.total_runs, 0);
    assert_eq!(phase2.status, PhaseStatus::Completed);

    let progress: Vec<u8> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            AnalysisEvent::RunProgress { overall_progress, .. } => Some(overall_progress),
            _ => None,
        })
        .collect();
    let at_30 = progress.iter().rposition(|p| *p == 30).unwrap();
    assert_eq!(progress[at_30 + 1], 70);
}

#[tokio::test]
async fn test_progress_events_are_monotonic() {
    // Given: parallel phase-2 units finishing in arbitrary order
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().with_delay(Duration::from_millis(5)));
    let coordinator = build_coordinator(&pool, collaborator, &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;
    let mut rx = coordinator.event_bus().subscribe();

    // When
    drive(&coordinator, run_id).await;

    // Then: overall progress never decreases and counters never exceed totals
    let events = drain_events(&mut rx);
    let mut last = 0u8;
    let mut progress_events = 0;
    for event in &events {
        if let AnalysisEvent::RunProgress { overall_progress, phases, .. } = event {
            assert!(*overall_progress >= last, "progress went {} -> {}", last, overall_progress);
            last = *overall_progress;
            progress_events += 1;
            for phase in phases {
                assert!(phase.terminal_runs() <= phase.total_runs);
            }
        }
    }
    assert_eq!(last, 100);
    // One per unit plus the phase transitions
    assert!(progress_events >= 8);

    let finished = events
        .iter()
        .filter(|e| matches!(e, AnalysisEvent::UnitFinished { .. }))
        .count();
    assert_eq!(finished, 8);
    assert!(matches!(events.last(), Some(AnalysisEvent::RunFinished { .. })));
}

#[tokio::test]
async fn test_cancel_during_phase2() {
    // Given: a phase-2 unit that never answers
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().hanging_on(RunType::MedicaidPlanning));
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;

    let cancel = coordinator.register_run(run_id).await;
    let driver = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.drive(run_id, &cancel).await })
    };
    collaborator.hanging.notified().await;

    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Phase2Running);

    // When: the run is cancelled while the unit is in flight
    let outcome = coordinator.cancel(run_id).await.unwrap();

    // Then
    assert_eq!(outcome, CancelOutcome::Cancelled);
    let status = tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(status, RunStatus::Failed);

    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.last_error.as_deref(), Some(CANCELLED_ERROR));
    assert!(run.final_report_id.is_none());

    let phases = db::phases::load_phases(&pool, run_id).await.unwrap();
    assert_eq!(phases[0].status, PhaseStatus::Completed);
    assert_eq!(phases[1].status, PhaseStatus::Failed);
    assert_eq!(phases[2].status, PhaseStatus::Failed);

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    let medicaid = units
        .iter()
        .find(|u| u.run_type == RunType::MedicaidPlanning)
        .unwrap();
    assert_eq!(medicaid.status, UnitStatus::Failed);
    assert_eq!(medicaid.error.as_deref(), Some(CANCELLED_ERROR));
    assert!(units.iter().all(|u| u.status != UnitStatus::Running));

    // Nothing from phase 3 was attempted
    assert!(collaborator.calls().iter().all(|t| t.phase_number() < 3));
    assert!(db::reports::load_report(&pool, run_id).await.unwrap().is_none());

    // A second cancel is a no-op
    let again = coordinator.cancel(run_id).await.unwrap();
    assert_eq!(again, CancelOutcome::AlreadyTerminal(RunStatus::Failed));
}

#[tokio::test]
async fn test_cancel_unknown_run() {
    let pool = test_pool().await;
    let coordinator = build_coordinator(&pool, Arc::new(ScriptedCollaborator::new()), &test_settings());

    let result = coordinator.cancel(Uuid::new_v4()).await;

    assert!(matches!(result, Err(OrchestrationError::RunNotFound(_))));
}

#[tokio::test]
async fn test_retryable_failure_is_retried() {
    // Given: asset review fails once with a transient error
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().flaky(RunType::AssetReview, 1));
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: the retry succeeded and is recorded on the unit
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(collaborator.call_count(RunType::AssetReview), 2);

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    let asset_review = units.iter().find(|u| u.run_type == RunType::AssetReview).unwrap();
    assert_eq!(asset_review.status, UnitStatus::Completed);
    assert_eq!(asset_review.retry_count, 1);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    // Given: a transient failure outlasting the retry allowance
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().flaky(RunType::ProbateExposure, 5));
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: one retry, then the unit fails and the run is partial
    assert_eq!(status, RunStatus::Partial);
    assert_eq!(collaborator.call_count(RunType::ProbateExposure), 2);

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    let probate = units.iter().find(|u| u.run_type == RunType::ProbateExposure).unwrap();
    assert_eq!(probate.status, UnitStatus::Failed);
    assert!(probate.error.as_deref().unwrap().contains("collaborator unavailable"));
}

#[tokio::test]
async fn test_unit_timeout_fails_only_that_unit() {
    // Given: a synthesis unit that never answers and a one-second unit timeout
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().hanging_on(RunType::GapAnalysis));
    let settings = epa_analysis::config::OrchestratorSettings {
        unit_timeout_secs: 1,
        unit_max_retries: 0,
        ..test_settings()
    };
    let coordinator = build_coordinator(&pool, collaborator, &settings);
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    let status = drive(&coordinator, run_id).await;

    // Then
    assert_eq!(status, RunStatus::Partial);
    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    let gap = units.iter().find(|u| u.run_type == RunType::GapAnalysis).unwrap();
    assert_eq!(gap.status, UnitStatus::Failed);
    assert_eq!(gap.error.as_deref(), Some("unit timed out after 1s"));

    let report = db::reports::load_report(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(report.report.failed_units, vec![RunType::GapAnalysis]);
    // Executive summary still supplied the score
    assert_eq!(report.report.score, 72);
}

#[tokio::test]
async fn test_run_timeout_fails_the_run() {
    // Given: a run budget shorter than a hanging unit's timeout
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new().hanging_on(RunType::EstateTax));
    let settings = epa_analysis::config::OrchestratorSettings {
        unit_timeout_secs: 5,
        run_timeout_secs: 1,
        ..test_settings()
    };
    let coordinator = build_coordinator(&pool, collaborator, &settings);
    let run_id = create_small_run(&coordinator, "owner-a").await;

    // When
    let status = drive(&coordinator, run_id).await;

    // Then: the whole run fails with the timeout as its error
    assert_eq!(status, RunStatus::Failed);
    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.last_error.as_deref(), Some("run timed out after 1s"));

    let units = db::run_results::load_units(&pool, run_id).await.unwrap();
    let estate_tax = units.iter().find(|u| u.run_type == RunType::EstateTax).unwrap();
    assert_eq!(estate_tax.status, UnitStatus::Failed);
    assert!(units
        .iter()
        .filter(|u| u.phase_number == 3)
        .all(|u| u.status == UnitStatus::Pending));
}

#[tokio::test]
async fn test_drive_terminal_run_is_noop() {
    // Given: a finished run
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new());
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;
    drive(&coordinator, run_id).await;
    let calls = collaborator.calls().len();

    // When: it is driven again
    let status = drive(&coordinator, run_id).await;

    // Then: nothing executes
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(collaborator.calls().len(), calls);
}

#[tokio::test]
async fn test_resume_skips_completed_phase() {
    // Given: phase 1 already completed by an earlier worker
    let pool = test_pool().await;
    let collaborator = Arc::new(ScriptedCollaborator::new());
    let coordinator = build_coordinator(&pool, collaborator.clone(), &test_settings());
    let run_id = create_small_run(&coordinator, "owner-a").await;
    let cancel = coordinator.register_run(run_id).await;
    coordinator.execute_phase(run_id, 1, &[], &cancel).await.unwrap();
    assert_eq!(collaborator.calls().len(), 2);

    // When: the run is driven from the top
    let status = coordinator.drive(run_id, &cancel).await.unwrap();

    // Then: phase 1 is not executed again
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(collaborator.call_count(RunType::DocumentInventory), 1);
    assert_eq!(collaborator.call_count(RunType::AssetReview), 1);
    assert_eq!(collaborator.calls().len(), 8);
}

#[tokio::test]
async fn test_submit_validates_intake() {
    let pool = test_pool().await;
    let coordinator = build_coordinator(&pool, Arc::new(ScriptedCollaborator::new()), &test_settings());
    let mut intake = sample_intake();
    intake.personal.state_of_residence = "New York".to_string();

    let result = coordinator.submit("owner-a", "", intake).await;

    match result {
        Err(epa_analysis::services::SubmitError::Invalid(problems)) => {
            assert_eq!(problems.len(), 2);
            assert!(problems.iter().any(|p| p.contains("client_id")));
            assert!(problems.iter().any(|p| p.contains("state_of_residence")));
        }
        other => panic!("expected invalid submission, got {:?}", other),
    }
    assert_eq!(db::runs::count_active_runs(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_submit_fixes_unit_plan_from_applicability() {
    let pool = test_pool().await;
    let coordinator = build_coordinator(&pool, Arc::new(ScriptedCollaborator::new()), &test_settings());

    let run_id = coordinator
        .submit("owner-a", "client-1", sample_intake())
        .await
        .unwrap();

    let run = db::runs::load_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Pending);
    assert_eq!(run.overall_progress, 0);
    assert_eq!(run.context.jurisdiction, "NY");
    assert!(run.config.phase_units[1].contains(&RunType::EstateTax));
    assert!(run.config.phase_units[1].contains(&RunType::MedicaidPlanning));
    assert!(!run.config.phase_units[1].contains(&RunType::BusinessSuccession));

    let phases = db::phases::load_phases(&pool, run_id).await.unwrap();
    for (phase, planned) in phases.iter().zip(run.config.phase_units.iter()) {
        assert_eq!(phase.total_runs as usize, planned.len());
        assert_eq!(phase.status, PhaseStatus::Pending);
    }
    assert_eq!(phases[2].total_runs, 3);
}
