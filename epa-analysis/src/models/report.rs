//! Aggregated phase output and the final synthesized report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{Finding, Recommendation, RunStatus, RunType, Severity, UnitFindings};

/// Findings of one completed unit inside an aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitEntry {
    pub run_type: RunType,
    pub summary: String,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// Consolidated output of one phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseAggregate {
    pub phase_number: u8,
    /// Completed units in applicability order
    pub units: Vec<UnitEntry>,
    pub failed_units: Vec<RunType>,
    /// De-duplicated, highest priority first
    pub recommendations: Vec<Recommendation>,
    pub severity_counts: BTreeMap<Severity, u32>,
    pub missing_documents: Vec<String>,
    pub outdated_documents: Vec<String>,
    pub inconsistencies: Vec<String>,
    pub tax_notes: Vec<String>,
    pub medicaid_notes: Vec<String>,
    pub state_notes: Vec<String>,
}

impl PhaseAggregate {
    pub fn unit(&self, run_type: RunType) -> Option<&UnitEntry> {
        self.units.iter().find(|u| u.run_type == run_type)
    }
}

/// Outcome of one unit as fed to the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub run_type: RunType,
    pub ordinal: u32,
    pub result: Result<UnitFindings, String>,
}

/// Externally visible report assembled from all three phases
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    /// Plan health score (0-100)
    pub score: u8,
    pub missing_documents: Vec<String>,
    pub outdated_documents: Vec<String>,
    pub inconsistencies: Vec<String>,
    pub tax_notes: Vec<String>,
    pub medicaid_notes: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub state_notes: Vec<String>,
    /// Units whose output is missing from this report
    pub failed_units: Vec<RunType>,
    /// True when at least one unit failed
    pub degraded: bool,
}

/// Persisted report row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub report_id: Uuid,
    pub run_id: Uuid,
    /// `completed` or `partial`
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub report: FinalReport,
}
