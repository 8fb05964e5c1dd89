//! Applicability rules engine
//!
//! Decides which work-unit types are relevant for a phase given the client's
//! context and intake. Pure and deterministic: the result fixes a phase's
//! `total_runs`, and therefore the progress denominator, for the whole run.

use crate::models::{AssetKind, ClientContext, DocumentKind, ParsedIntake, RunType};

/// Gross estate at or above which federal estate tax analysis always applies
pub const ESTATE_TAX_THRESHOLD_USD: f64 = 5_000_000.0;

/// Age at which long-term-care (Medicaid) planning becomes relevant
pub const MEDICAID_PLANNING_AGE: u32 = 60;

/// Jurisdictions levying a state estate or inheritance tax
pub const STATE_DEATH_TAX_JURISDICTIONS: [&str; 18] = [
    "CT", "DC", "HI", "IA", "IL", "KY", "MA", "MD", "ME", "MN", "NE", "NJ", "NY", "OR", "PA",
    "RI", "VT", "WA",
];

/// Ordered set of unit types applicable to `phase_number`
///
/// Unknown phase numbers select nothing.
pub fn select_applicable_units(
    phase_number: u8,
    context: &ClientContext,
    intake: &ParsedIntake,
) -> Vec<RunType> {
    RunType::ALL
        .iter()
        .copied()
        .filter(|t| t.phase_number() == phase_number)
        .filter(|t| is_applicable(*t, context, intake))
        .collect()
}

/// Applicability for all three phases at once
pub fn select_all_phases(context: &ClientContext, intake: &ParsedIntake) -> [Vec<RunType>; 3] {
    [
        select_applicable_units(1, context, intake),
        select_applicable_units(2, context, intake),
        select_applicable_units(3, context, intake),
    ]
}

fn is_applicable(run_type: RunType, context: &ClientContext, intake: &ParsedIntake) -> bool {
    use RunType::*;
    match run_type {
        DocumentInventory | AssetReview | FamilyStructure | StateLawResearch => true,
        BeneficiaryReview => {
            !intake.beneficiaries.is_empty()
                || intake.has_asset(AssetKind::Retirement)
                || intake.has_asset(AssetKind::LifeInsurance)
        }

        EstateTax => {
            intake.gross_estate_usd() >= ESTATE_TAX_THRESHOLD_USD
                || STATE_DEATH_TAX_JURISDICTIONS.contains(&context.jurisdiction.as_str())
        }
        MedicaidPlanning => {
            let oldest = intake.personal.age.max(intake.family.spouse_age);
            intake.goals.long_term_care || oldest.map(|a| a >= MEDICAID_PLANNING_AGE).unwrap_or(false)
        }
        BusinessSuccession => intake.has_asset(AssetKind::BusinessInterest),
        IncapacityPlanning => {
            !intake.has_document(DocumentKind::FinancialPowerOfAttorney)
                || !intake.has_document(DocumentKind::HealthcareDirective)
        }
        ProbateExposure => intake
            .assets
            .iter()
            .any(|a| !a.titled_in_trust && !a.has_beneficiary),
        BeneficiaryConsistency => !intake.beneficiaries.is_empty(),
        MinorChildren => intake.family.dependents.iter().any(|d| d.is_minor()),
        SpecialNeeds => intake.family.dependents.iter().any(|d| d.special_needs),
        CharitableGiving => intake.goals.charitable_giving,
        MultiStateProperty => intake.assets.iter().any(|a| {
            a.kind == AssetKind::RealEstate
                && a.location_state
                    .as_deref()
                    .map(|s| !s.eq_ignore_ascii_case(&context.jurisdiction))
                    .unwrap_or(false)
        }),

        GapAnalysis | Recommendations | ExecutiveSummary => true,
    }
}
