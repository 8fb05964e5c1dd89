//! Typed work-unit output
//!
//! Every analysis call returns the same structured payload; individual unit
//! types fill in the sections relevant to them.

use serde::{Deserialize, Serialize};

use super::RunType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub title: String,
    #[serde(default)]
    pub detail: String,
    /// Unit types that produced this recommendation (filled by aggregation)
    #[serde(default)]
    pub sources: Vec<RunType>,
}

/// Result payload of one completed work unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitFindings {
    #[serde(default)]
    pub summary: String,
    /// Plan health score (0-100) when the unit produces one
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    #[serde(default)]
    pub missing_documents: Vec<String>,
    #[serde(default)]
    pub outdated_documents: Vec<String>,
    #[serde(default)]
    pub inconsistencies: Vec<String>,
    #[serde(default)]
    pub tax_notes: Vec<String>,
    #[serde(default)]
    pub medicaid_notes: Vec<String>,
    #[serde(default)]
    pub state_notes: Vec<String>,
}

impl UnitFindings {
    /// Reject payloads that parse but cannot be used
    pub fn validate(&self) -> Result<(), String> {
        if let Some(score) = self.score {
            if score > 100 {
                return Err(format!("score {} outside 0-100", score));
            }
        }
        if self.findings.iter().any(|f| f.title.trim().is_empty()) {
            return Err("finding with empty title".to_string());
        }
        if self.recommendations.iter().any(|r| r.title.trim().is_empty()) {
            return Err("recommendation with empty title".to_string());
        }
        Ok(())
    }
}
