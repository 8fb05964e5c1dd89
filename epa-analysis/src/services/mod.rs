//! Orchestration services
//!
//! Pure components (applicability, progress, aggregation) at the bottom, the
//! work-unit executor and its HTTP collaborator, then the phase runner, the run
//! coordinator and the background worker that drives queued runs.

pub mod aggregator;
pub mod applicability;
pub mod executor;
pub mod http_collaborator;
pub mod phase_runner;
pub mod progress;
pub mod rate_limiter;
pub mod run_coordinator;
pub mod worker;

pub use aggregator::{aggregate, synthesize, AggregationError};
pub use applicability::{select_all_phases, select_applicable_units};
pub use executor::{
    AnalysisCollaborator, AnalysisRequest, CollaboratorError, CollaboratorResponse, UnitError,
    WorkUnitExecutor,
};
pub use http_collaborator::HttpAnalysisClient;
pub use phase_runner::{run_phase, PhaseOutcome, UnitProgressListener};
pub use progress::progress;
pub use rate_limiter::SubmissionLimiter;
pub use run_coordinator::{CancelOutcome, RunCoordinator, SubmitError};
pub use worker::AnalysisWorker;
