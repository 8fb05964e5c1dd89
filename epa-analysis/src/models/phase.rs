//! Phase records: exactly three per run, created together at submission

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::PhaseAggregate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseType {
    Research,
    Analysis,
    Synthesis,
}

impl PhaseType {
    pub fn for_phase(phase_number: u8) -> Option<PhaseType> {
        match phase_number {
            1 => Some(PhaseType::Research),
            2 => Some(PhaseType::Analysis),
            3 => Some(PhaseType::Synthesis),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseType::Research => "research",
            PhaseType::Analysis => "analysis",
            PhaseType::Synthesis => "synthesis",
        }
    }
}

impl FromStr for PhaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "research" => Ok(PhaseType::Research),
            "analysis" => Ok(PhaseType::Analysis),
            "synthesis" => Ok(PhaseType::Synthesis),
            other => Err(format!("unknown phase type: {}", other)),
        }
    }
}

/// Phase status. `failed` is reserved for orchestration-level faults; a phase
/// whose units failed still ends `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Failed)
    }
}

impl FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PhaseStatus::Pending),
            "running" => Ok(PhaseStatus::Running),
            "completed" => Ok(PhaseStatus::Completed),
            "failed" => Ok(PhaseStatus::Failed),
            other => Err(format!("unknown phase status: {}", other)),
        }
    }
}

/// How a phase schedules its units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One unit at a time, in applicability order
    Sequential,
    /// Up to N units in flight; completion order is unspecified
    BoundedParallel(usize),
}

impl ExecutionMode {
    /// Mode used for phase `n` given the configured phase-2 ceiling
    pub fn for_phase(phase_number: u8, phase2_concurrency: usize) -> Self {
        if phase_number == 2 {
            ExecutionMode::BoundedParallel(phase2_concurrency.max(1))
        } else {
            ExecutionMode::Sequential
        }
    }

    /// Maximum simultaneously in-flight units
    pub fn limit(self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::BoundedParallel(n) => n.max(1),
        }
    }
}

/// Unit counters of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub total_runs: u32,
    pub completed_runs: u32,
    pub failed_runs: u32,
}

impl PhaseCounts {
    pub fn terminal_runs(&self) -> u32 {
        self.completed_runs + self.failed_runs
    }

    pub fn is_resolved(&self) -> bool {
        self.terminal_runs() == self.total_runs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase_id: Uuid,
    pub run_id: Uuid,
    pub phase_number: u8,
    pub phase_type: PhaseType,
    pub status: PhaseStatus,
    /// Fixed at creation
    pub total_runs: u32,
    pub completed_runs: u32,
    pub failed_runs: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub aggregated_results: Option<PhaseAggregate>,
}

impl Phase {
    pub fn counts(&self) -> PhaseCounts {
        PhaseCounts {
            total_runs: self.total_runs,
            completed_runs: self.completed_runs,
            failed_runs: self.failed_runs,
        }
    }
}
