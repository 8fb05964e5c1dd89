//! Client intake snapshot
//!
//! The parsed intake is immutable for the lifetime of a run: it is stored with
//! the run record at submission and only ever read by the orchestrator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Marital status as reported on the intake form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaritalStatus {
    Single,
    Married,
    DomesticPartnership,
    Divorced,
    Widowed,
}

/// Personal section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub full_name: String,
    #[serde(default)]
    pub age: Option<u32>,
    /// Two-letter state code (e.g. "NY")
    pub state_of_residence: String,
    pub marital_status: MaritalStatus,
}

/// A child or other dependent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependent {
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub special_needs: bool,
}

impl Dependent {
    pub fn is_minor(&self) -> bool {
        self.age.map(|age| age < 18).unwrap_or(false)
    }
}

/// Family section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyInfo {
    #[serde(default)]
    pub spouse_age: Option<u32>,
    #[serde(default)]
    pub dependents: Vec<Dependent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    RealEstate,
    BusinessInterest,
    Retirement,
    LifeInsurance,
    Brokerage,
    BankAccount,
    Other,
}

/// One asset line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub kind: AssetKind,
    #[serde(default)]
    pub description: String,
    pub value_usd: f64,
    /// State where the asset is situated (real estate) or held
    #[serde(default)]
    pub location_state: Option<String>,
    #[serde(default)]
    pub titled_in_trust: bool,
    /// Asset passes by designation (TOD/POD, beneficiary form)
    #[serde(default)]
    pub has_beneficiary: bool,
}

/// Goals section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goals {
    #[serde(default)]
    pub avoid_probate: bool,
    #[serde(default)]
    pub minimize_taxes: bool,
    #[serde(default)]
    pub long_term_care: bool,
    #[serde(default)]
    pub charitable_giving: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Will,
    RevocableTrust,
    FinancialPowerOfAttorney,
    HealthcareDirective,
    HipaaAuthorization,
    Other,
}

/// An existing estate document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstateDocument {
    pub kind: DocumentKind,
    #[serde(default)]
    pub executed_on: Option<NaiveDate>,
    /// State whose law the document was executed under
    #[serde(default)]
    pub state_executed: Option<String>,
}

/// Beneficiary designation on an account or policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeneficiaryDesignation {
    pub account: String,
    pub primary: String,
    #[serde(default)]
    pub contingent: Option<String>,
    /// Share of the account going to `primary` (0-100)
    pub percentage: f64,
}

/// Parsed intake: personal, family, asset, goals and document sections plus
/// beneficiary designations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntake {
    pub personal: PersonalInfo,
    #[serde(default)]
    pub family: FamilyInfo,
    #[serde(default)]
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub goals: Goals,
    #[serde(default)]
    pub documents: Vec<EstateDocument>,
    #[serde(default)]
    pub beneficiaries: Vec<BeneficiaryDesignation>,
}

impl ParsedIntake {
    /// Check structural validity; returns every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.personal.full_name.trim().is_empty() {
            problems.push("personal.full_name must not be empty".to_string());
        }
        if !is_state_code(&self.personal.state_of_residence) {
            problems.push(format!(
                "personal.state_of_residence must be a two-letter state code, got {:?}",
                self.personal.state_of_residence
            ));
        }
        for (idx, asset) in self.assets.iter().enumerate() {
            if !asset.value_usd.is_finite() || asset.value_usd < 0.0 {
                problems.push(format!("assets[{}].value_usd must be a non-negative amount", idx));
            }
            if let Some(state) = &asset.location_state {
                if !is_state_code(state) {
                    problems.push(format!("assets[{}].location_state is not a state code", idx));
                }
            }
        }
        for (idx, designation) in self.beneficiaries.iter().enumerate() {
            if !(0.0..=100.0).contains(&designation.percentage) {
                problems.push(format!("beneficiaries[{}].percentage must be within 0-100", idx));
            }
            if designation.primary.trim().is_empty() {
                problems.push(format!("beneficiaries[{}].primary must not be empty", idx));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Sum of all asset values
    pub fn gross_estate_usd(&self) -> f64 {
        self.assets.iter().map(|a| a.value_usd).sum()
    }

    pub fn has_asset(&self, kind: AssetKind) -> bool {
        self.assets.iter().any(|a| a.kind == kind)
    }

    pub fn has_document(&self, kind: DocumentKind) -> bool {
        self.documents.iter().any(|d| d.kind == kind)
    }
}

fn is_state_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())
}

/// Who the run is for. Derived once at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    /// Owning entity (advisor/firm account)
    pub owner_id: String,
    /// Client record the intake belongs to
    pub client_id: String,
    /// Upper-cased state of residence
    pub jurisdiction: String,
}

impl ClientContext {
    pub fn new(owner_id: impl Into<String>, client_id: impl Into<String>, intake: &ParsedIntake) -> Self {
        Self {
            owner_id: owner_id.into(),
            client_id: client_id.into(),
            jurisdiction: intake.personal.state_of_residence.to_ascii_uppercase(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ParsedIntake {
        ParsedIntake {
            personal: PersonalInfo {
                full_name: "Dana Client".to_string(),
                age: Some(52),
                state_of_residence: "ny".to_string(),
                marital_status: MaritalStatus::Married,
            },
            family: FamilyInfo::default(),
            assets: Vec::new(),
            goals: Goals::default(),
            documents: Vec::new(),
            beneficiaries: Vec::new(),
        }
    }

    #[test]
    fn test_minimal_intake_is_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let mut intake = minimal();
        intake.personal.full_name = "  ".to_string();
        intake.personal.state_of_residence = "New York".to_string();
        intake.assets.push(Asset {
            kind: AssetKind::BankAccount,
            description: String::new(),
            value_usd: -5.0,
            location_state: None,
            titled_in_trust: false,
            has_beneficiary: false,
        });
        intake.beneficiaries.push(BeneficiaryDesignation {
            account: "401k".to_string(),
            primary: "Spouse".to_string(),
            contingent: None,
            percentage: 120.0,
        });

        let problems = intake.validate().unwrap_err();
        assert_eq!(problems.len(), 4, "{:?}", problems);
    }

    #[test]
    fn test_context_normalizes_jurisdiction() {
        let ctx = ClientContext::new("owner-1", "client-1", &minimal());
        assert_eq!(ctx.jurisdiction, "NY");
    }

    #[test]
    fn test_intake_deserializes_with_defaults() {
        let json = r#"{
            "personal": {
                "full_name": "Sam Example",
                "state_of_residence": "TX",
                "marital_status": "single"
            }
        }"#;
        let intake: ParsedIntake = serde_json::from_str(json).unwrap();
        assert!(intake.assets.is_empty());
        assert!(!intake.goals.charitable_giving);
        assert_eq!(intake.personal.age, None);
    }
}
