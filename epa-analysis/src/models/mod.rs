//! Data models for epa-analysis
//!
//! - Run / Phase / RunResult records and their state machines
//! - Client intake snapshot
//! - Durable job queue rows
//! - Typed unit findings, phase aggregates and the final report

pub mod findings;
pub mod intake;
pub mod job;
pub mod phase;
pub mod report;
pub mod run;
pub mod run_result;

pub use findings::{Finding, Priority, Recommendation, Severity, UnitFindings};
pub use intake::{
    Asset, AssetKind, BeneficiaryDesignation, ClientContext, Dependent, DocumentKind,
    EstateDocument, FamilyInfo, Goals, MaritalStatus, ParsedIntake, PersonalInfo,
};
pub use job::{AnalysisJob, JobState};
pub use phase::{ExecutionMode, Phase, PhaseCounts, PhaseStatus, PhaseType};
pub use report::{FinalReport, PhaseAggregate, StoredReport, UnitEntry, UnitOutcome};
pub use run::{AnalysisRun, RunConfig, RunStatus, CANCELLED_ERROR};
pub use run_result::{RunResult, RunType, UnitStatus};
