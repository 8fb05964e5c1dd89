//! Test Helper Utilities
//!
//! Shared utilities for testing epa-analysis: in-memory database, a scripted
//! analysis collaborator and intake builders.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use epa_analysis::config::OrchestratorSettings;
use epa_analysis::models::{
    Asset, AssetKind, BeneficiaryDesignation, ClientContext, DocumentKind, EstateDocument,
    FamilyInfo, Goals, MaritalStatus, ParsedIntake, PersonalInfo, Priority, Recommendation,
    RunType, UnitFindings,
};
use epa_analysis::services::{
    AnalysisCollaborator, AnalysisRequest, CollaboratorError, CollaboratorResponse,
    RunCoordinator, WorkUnitExecutor,
};
use epa_common::events::EventBus;
use sqlx::SqlitePool;

pub async fn test_pool() -> SqlitePool {
    epa_analysis::db::init_memory_pool().await.unwrap()
}

/// Fast settings for tests: short backoff, small timeouts
pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        phase2_concurrency: 3,
        unit_timeout_secs: 5,
        run_timeout_secs: 30,
        unit_max_retries: 1,
        retry_backoff_ms: 10,
        worker_poll_interval_ms: 50,
        ..Default::default()
    }
}

/// How a scripted unit behaves
#[derive(Debug, Clone)]
enum Script {
    /// Fail every attempt with this error
    Fail(CollaboratorError),
    /// Fail this many attempts with a retryable error, then succeed
    FailTimes(u32),
    /// Never answer (until timed out or cancelled)
    Hang,
}

/// Collaborator answering from a per-run-type script
///
/// Unscripted run types succeed with a summary naming the run type.
#[derive(Default)]
pub struct ScriptedCollaborator {
    scripts: Mutex<HashMap<RunType, Script>>,
    delay: Duration,
    calls: Mutex<Vec<RunType>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Notified when a hanging unit is entered
    pub hanging: Arc<Notify>,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Permanent, non-retryable failure for `run_type`
    pub fn failing(self, run_type: RunType) -> Self {
        self.script(
            run_type,
            Script::Fail(CollaboratorError::Rejected {
                status: 422,
                message: format!("{} could not be analyzed", run_type),
            }),
        )
    }

    /// Retryable failure for the first `times` attempts of `run_type`
    pub fn flaky(self, run_type: RunType, times: u32) -> Self {
        self.script(run_type, Script::FailTimes(times))
    }

    pub fn hanging_on(self, run_type: RunType) -> Self {
        self.script(run_type, Script::Hang)
    }

    fn script(self, run_type: RunType, script: Script) -> Self {
        self.scripts.lock().unwrap().insert(run_type, script);
        self
    }

    /// Every invocation so far, in call order (retries included)
    pub fn calls(&self) -> Vec<RunType> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, run_type: RunType) -> usize {
        self.calls().iter().filter(|t| **t == run_type).count()
    }

    /// Highest number of simultaneously running invocations observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_script(&self, run_type: RunType) -> Option<Script> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&run_type) {
            Some(Script::FailTimes(0)) => None,
            Some(Script::FailTimes(remaining)) => {
                *remaining -= 1;
                Some(Script::FailTimes(*remaining + 1))
            }
            Some(other) => Some(other.clone()),
            None => None,
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalysisCollaborator for ScriptedCollaborator {
    async fn invoke(
        &self,
        request: &AnalysisRequest<'_>,
    ) -> Result<CollaboratorResponse, CollaboratorError> {
        self.calls.lock().unwrap().push(request.run_type);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_script(request.run_type) {
            Some(Script::Fail(err)) => return Err(err),
            Some(Script::FailTimes(_)) => {
                return Err(CollaboratorError::Unavailable("collaborator returned 503".to_string()))
            }
            Some(Script::Hang) => {
                self.hanging.notify_one();
                std::future::pending::<()>().await;
            }
            None => {}
        }

        Ok(CollaboratorResponse {
            findings: findings_for(request.run_type, request.prior.len()),
            cost_usd: Some(0.25),
            prompt: Some(format!("analyze {}", request.run_type)),
        })
    }
}

/// Canned findings; every phase-2 unit repeats one shared recommendation
pub fn findings_for(run_type: RunType, prior_phases: usize) -> UnitFindings {
    let mut findings = UnitFindings {
        summary: format!("{} reviewed with {} prior phases", run_type, prior_phases),
        ..Default::default()
    };
    match run_type.phase_number() {
        1 => findings.state_notes.push("Residence state follows UPC".to_string()),
        2 => findings.recommendations.push(Recommendation {
            priority: Priority::High,
            title: "Update beneficiary designations".to_string(),
            detail: String::new(),
            sources: Vec::new(),
        }),
        _ => {}
    }
    if run_type == RunType::ExecutiveSummary {
        findings.score = Some(72);
    }
    findings
}

pub fn build_coordinator(
    pool: &SqlitePool,
    collaborator: Arc<ScriptedCollaborator>,
    settings: &OrchestratorSettings,
) -> Arc<RunCoordinator> {
    let executor = Arc::new(WorkUnitExecutor::new(
        collaborator,
        settings.unit_timeout(),
        settings.unit_max_retries,
        settings.retry_backoff(),
    ));
    Arc::new(RunCoordinator::new(
        pool.clone(),
        EventBus::new(settings.event_bus_capacity),
        executor,
        settings,
    ))
}

fn document(kind: DocumentKind) -> EstateDocument {
    EstateDocument {
        kind,
        executed_on: None,
        state_executed: Some("NY".to_string()),
    }
}

/// 67-year-old married New York resident with a will only
///
/// Phase 2 selects estate tax, Medicaid planning, incapacity planning,
/// probate exposure and beneficiary consistency.
pub fn sample_intake() -> ParsedIntake {
    ParsedIntake {
        personal: PersonalInfo {
            full_name: "Morgan Client".to_string(),
            age: Some(67),
            state_of_residence: "NY".to_string(),
            marital_status: MaritalStatus::Married,
        },
        family: FamilyInfo {
            spouse_age: Some(64),
            dependents: Vec::new(),
        },
        assets: vec![
            Asset {
                kind: AssetKind::RealEstate,
                description: "Primary residence".to_string(),
                value_usd: 900_000.0,
                location_state: Some("NY".to_string()),
                titled_in_trust: false,
                has_beneficiary: false,
            },
            Asset {
                kind: AssetKind::Retirement,
                description: "IRA".to_string(),
                value_usd: 650_000.0,
                location_state: None,
                titled_in_trust: false,
                has_beneficiary: true,
            },
        ],
        goals: Goals {
            avoid_probate: true,
            ..Default::default()
        },
        documents: vec![document(DocumentKind::Will)],
        beneficiaries: vec![BeneficiaryDesignation {
            account: "IRA".to_string(),
            primary: "Spouse".to_string(),
            contingent: None,
            percentage: 100.0,
        }],
    }
}

/// 35-year-old single Texas resident with incapacity documents and no assets:
/// no phase-2 unit applies
pub fn no_phase2_intake() -> ParsedIntake {
    ParsedIntake {
        personal: PersonalInfo {
            full_name: "Riley Client".to_string(),
            age: Some(35),
            state_of_residence: "TX".to_string(),
            marital_status: MaritalStatus::Single,
        },
        family: FamilyInfo::default(),
        assets: Vec::new(),
        goals: Goals::default(),
        documents: vec![
            document(DocumentKind::FinancialPowerOfAttorney),
            document(DocumentKind::HealthcareDirective),
        ],
        beneficiaries: Vec::new(),
    }
}

/// Two phase-1 units, three phase-2 units, full phase 3
pub fn small_plan() -> [Vec<RunType>; 3] {
    [
        vec![RunType::DocumentInventory, RunType::AssetReview],
        vec![
            RunType::EstateTax,
            RunType::MedicaidPlanning,
            RunType::ProbateExposure,
        ],
        vec![
            RunType::GapAnalysis,
            RunType::Recommendations,
            RunType::ExecutiveSummary,
        ],
    ]
}

/// Every unit type of every phase, in declaration order
pub fn full_plan() -> [Vec<RunType>; 3] {
    let phase = |n: u8| RunType::ALL.iter().copied().filter(|t| t.phase_number() == n).collect();
    [phase(1), phase(2), phase(3)]
}

/// Create a run for `owner_id` with [`small_plan`]
pub async fn create_small_run(coordinator: &RunCoordinator, owner_id: &str) -> Uuid {
    let intake = sample_intake();
    let context = ClientContext::new(owner_id, "client-1", &intake);
    coordinator
        .create_run(context, intake, small_plan())
        .await
        .unwrap()
}
