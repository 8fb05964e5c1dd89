//! Analysis run type definitions
//!
//! Supporting payloads for analysis progress events.

use serde::{Deserialize, Serialize};

/// Per-phase counters carried on progress events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCountsData {
    /// Phase number (1-3)
    pub phase_number: u8,
    /// Phase status (pending/running/completed/failed)
    pub status: String,
    /// Applicable work units (fixed at run start)
    pub total_runs: u32,
    /// Units finished successfully
    pub completed_runs: u32,
    /// Units finished with an error
    pub failed_runs: u32,
}

impl PhaseCountsData {
    /// Units that reached a terminal state
    pub fn terminal_runs(&self) -> u32 {
        self.completed_runs + self.failed_runs
    }
}

/// Outcome of a single work unit as reported on the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcomeKind {
    Completed,
    Failed,
}
