//! Work units: the kinds of analysis call and their persisted results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::UnitFindings;

/// Kind of analysis performed by a single work unit
///
/// Declaration order is the execution order within a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    // Phase 1: research
    DocumentInventory,
    AssetReview,
    FamilyStructure,
    BeneficiaryReview,
    StateLawResearch,
    // Phase 2: analysis
    EstateTax,
    MedicaidPlanning,
    BusinessSuccession,
    IncapacityPlanning,
    ProbateExposure,
    BeneficiaryConsistency,
    MinorChildren,
    SpecialNeeds,
    CharitableGiving,
    MultiStateProperty,
    // Phase 3: synthesis
    GapAnalysis,
    Recommendations,
    ExecutiveSummary,
}

impl RunType {
    pub const ALL: [RunType; 18] = [
        RunType::DocumentInventory,
        RunType::AssetReview,
        RunType::FamilyStructure,
        RunType::BeneficiaryReview,
        RunType::StateLawResearch,
        RunType::EstateTax,
        RunType::MedicaidPlanning,
        RunType::BusinessSuccession,
        RunType::IncapacityPlanning,
        RunType::ProbateExposure,
        RunType::BeneficiaryConsistency,
        RunType::MinorChildren,
        RunType::SpecialNeeds,
        RunType::CharitableGiving,
        RunType::MultiStateProperty,
        RunType::GapAnalysis,
        RunType::Recommendations,
        RunType::ExecutiveSummary,
    ];

    /// Phase this unit type belongs to (1-3)
    pub fn phase_number(self) -> u8 {
        use RunType::*;
        match self {
            DocumentInventory | AssetReview | FamilyStructure | BeneficiaryReview
            | StateLawResearch => 1,
            EstateTax | MedicaidPlanning | BusinessSuccession | IncapacityPlanning
            | ProbateExposure | BeneficiaryConsistency | MinorChildren | SpecialNeeds
            | CharitableGiving | MultiStateProperty => 2,
            GapAnalysis | Recommendations | ExecutiveSummary => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        use RunType::*;
        match self {
            DocumentInventory => "document_inventory",
            AssetReview => "asset_review",
            FamilyStructure => "family_structure",
            BeneficiaryReview => "beneficiary_review",
            StateLawResearch => "state_law_research",
            EstateTax => "estate_tax",
            MedicaidPlanning => "medicaid_planning",
            BusinessSuccession => "business_succession",
            IncapacityPlanning => "incapacity_planning",
            ProbateExposure => "probate_exposure",
            BeneficiaryConsistency => "beneficiary_consistency",
            MinorChildren => "minor_children",
            SpecialNeeds => "special_needs",
            CharitableGiving => "charitable_giving",
            MultiStateProperty => "multi_state_property",
            GapAnalysis => "gap_analysis",
            Recommendations => "recommendations",
            ExecutiveSummary => "executive_summary",
        }
    }
}

impl fmt::Display for RunType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown run type: {}", s))
    }
}

/// Work unit status: pending → running → {completed, failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Running => "running",
            UnitStatus::Completed => "completed",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::Failed)
    }
}

impl FromStr for UnitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UnitStatus::Pending),
            "running" => Ok(UnitStatus::Running),
            "completed" => Ok(UnitStatus::Completed),
            "failed" => Ok(UnitStatus::Failed),
            other => Err(format!("unknown unit status: {}", other)),
        }
    }
}

/// One executed (or to-be-executed) analysis call within a phase
///
/// Retries replace the record in place and bump `retry_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub result_id: Uuid,
    pub run_id: Uuid,
    pub phase_id: Uuid,
    pub phase_number: u8,
    pub run_type: RunType,
    /// Position in the phase's applicability order
    pub ordinal: u32,
    pub status: UnitStatus,
    /// Context snapshot returned by the collaborator, kept for audit
    pub prompt: Option<String>,
    pub result: Option<UnitFindings>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub cost_usd: Option<f64>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_type_round_trips_through_str() {
        for run_type in RunType::ALL {
            assert_eq!(run_type.as_str().parse::<RunType>().unwrap(), run_type);
            assert_eq!(
                serde_json::to_value(run_type).unwrap(),
                serde_json::Value::String(run_type.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_phase_membership_is_contiguous() {
        let phases: Vec<u8> = RunType::ALL.iter().map(|t| t.phase_number()).collect();
        let mut sorted = phases.clone();
        sorted.sort();
        assert_eq!(phases, sorted);
        assert_eq!(phases.iter().filter(|p| **p == 3).count(), 3);
    }
}
