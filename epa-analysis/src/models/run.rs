//! Analysis run state machine
//!
//! pending → phase1_running → phase1_complete → phase2_running → phase2_complete
//! → phase3_running → {completed | partial | failed}
//!
//! `failed` is reachable from every non-terminal state. Terminal states never
//! transition again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{ClientContext, ParsedIntake, RunType};

/// Error text recorded when a run is cancelled by request
pub const CANCELLED_ERROR: &str = "analysis run cancelled by request";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Phase1Running,
    Phase1Complete,
    Phase2Running,
    Phase2Complete,
    Phase3Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    /// Status while phase `n` executes
    pub fn running(phase_number: u8) -> Option<RunStatus> {
        match phase_number {
            1 => Some(RunStatus::Phase1Running),
            2 => Some(RunStatus::Phase2Running),
            3 => Some(RunStatus::Phase3Running),
            _ => None,
        }
    }

    /// Status once phase `n` resolved (phase 3 resolves into a terminal state)
    pub fn complete(phase_number: u8) -> Option<RunStatus> {
        match phase_number {
            1 => Some(RunStatus::Phase1Complete),
            2 => Some(RunStatus::Phase2Complete),
            _ => None,
        }
    }

    /// Position along the lifecycle; terminal states share the last rank
    fn rank(self) -> u8 {
        match self {
            RunStatus::Pending => 0,
            RunStatus::Phase1Running => 1,
            RunStatus::Phase1Complete => 2,
            RunStatus::Phase2Running => 3,
            RunStatus::Phase2Complete => 4,
            RunStatus::Phase3Running => 5,
            RunStatus::Completed | RunStatus::Partial | RunStatus::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Partial | RunStatus::Failed)
    }

    /// Phase the run is currently in, if any
    pub fn current_phase(self) -> Option<u8> {
        match self {
            RunStatus::Phase1Running | RunStatus::Phase1Complete => Some(1),
            RunStatus::Phase2Running | RunStatus::Phase2Complete => Some(2),
            RunStatus::Phase3Running => Some(3),
            _ => None,
        }
    }

    /// True when phase `n` has fully resolved under this status
    pub fn has_completed_phase(self, phase_number: u8) -> bool {
        match phase_number {
            1 => self.rank() >= RunStatus::Phase1Complete.rank() && self != RunStatus::Failed,
            2 => self.rank() >= RunStatus::Phase2Complete.rank() && self != RunStatus::Failed,
            _ => matches!(self, RunStatus::Completed | RunStatus::Partial),
        }
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunStatus::Failed => true,
            RunStatus::Completed | RunStatus::Partial => self == RunStatus::Phase3Running,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Phase1Running => "phase1_running",
            RunStatus::Phase1Complete => "phase1_complete",
            RunStatus::Phase2Running => "phase2_running",
            RunStatus::Phase2Complete => "phase2_complete",
            RunStatus::Phase3Running => "phase3_running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// SQL list of terminal status literals
    pub const TERMINAL_SQL: &'static str = "('completed', 'partial', 'failed')";
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending" => RunStatus::Pending,
            "phase1_running" => RunStatus::Phase1Running,
            "phase1_complete" => RunStatus::Phase1Complete,
            "phase2_running" => RunStatus::Phase2Running,
            "phase2_complete" => RunStatus::Phase2Complete,
            "phase3_running" => RunStatus::Phase3Running,
            "completed" => RunStatus::Completed,
            "partial" => RunStatus::Partial,
            "failed" => RunStatus::Failed,
            other => return Err(format!("unknown run status: {}", other)),
        };
        Ok(status)
    }
}

/// Configuration snapshot stored with the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Work-unit types selected for phases 1, 2 and 3
    pub phase_units: [Vec<RunType>; 3],
    pub phase2_concurrency: usize,
    pub unit_timeout_secs: u64,
    pub run_timeout_secs: u64,
    pub unit_max_retries: u32,
}

/// One orchestration instance for one client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: Uuid,
    pub owner_id: String,
    pub client_id: String,
    pub status: RunStatus,
    /// Overall percentage (0-100), never decreases
    pub overall_progress: u8,
    pub current_phase: Option<u8>,
    pub context: ClientContext,
    pub intake: ParsedIntake,
    pub config: RunConfig,
    pub last_error: Option<String>,
    /// Times the run was re-claimed after a worker died mid-run
    pub retry_count: u32,
    pub final_report_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub phase_completed_at: [Option<DateTime<Utc>>; 3],
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn was_cancelled(&self) -> bool {
        self.status == RunStatus::Failed && self.last_error.as_deref() == Some(CANCELLED_ERROR)
    }
}
