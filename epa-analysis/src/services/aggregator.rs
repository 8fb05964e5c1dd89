//! Result aggregation
//!
//! `aggregate` folds the unit outcomes of one phase into a [`PhaseAggregate`];
//! `synthesize` projects the three phase aggregates into the [`FinalReport`].
//! Both are pure: the same inputs give the same output regardless of the order
//! in which parallel units finished.

use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::models::{
    FinalReport, PhaseAggregate, Recommendation, RunType, Severity, UnitEntry, UnitOutcome,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("unit {run_type} does not belong to phase {phase_number}")]
    WrongPhase { run_type: RunType, phase_number: u8 },

    #[error("unit {0} reported more than once")]
    Duplicate(RunType),
}

/// Fold the outcomes of one phase
pub fn aggregate(
    phase_number: u8,
    outcomes: &[UnitOutcome],
) -> Result<PhaseAggregate, AggregationError> {
    let mut seen = HashSet::new();
    for outcome in outcomes {
        if outcome.run_type.phase_number() != phase_number {
            return Err(AggregationError::WrongPhase {
                run_type: outcome.run_type,
                phase_number,
            });
        }
        if !seen.insert(outcome.run_type) {
            return Err(AggregationError::Duplicate(outcome.run_type));
        }
    }

    // Completion order of parallel units is arbitrary
    let mut ordered: Vec<&UnitOutcome> = outcomes.iter().collect();
    ordered.sort_by_key(|o| (o.ordinal, o.run_type));

    let mut agg = PhaseAggregate {
        phase_number,
        ..Default::default()
    };
    let mut recommendations = RecommendationMerger::default();
    let mut notes = NoteSets::default();

    for outcome in ordered {
        let findings = match &outcome.result {
            Ok(findings) => findings,
            Err(_) => {
                agg.failed_units.push(outcome.run_type);
                continue;
            }
        };

        for finding in &findings.findings {
            *agg.severity_counts.entry(finding.severity).or_insert(0) += 1;
        }
        for rec in &findings.recommendations {
            recommendations.add(rec, Some(outcome.run_type));
        }

        notes.missing.extend(&mut agg.missing_documents, &findings.missing_documents);
        notes.outdated.extend(&mut agg.outdated_documents, &findings.outdated_documents);
        notes.inconsistencies.extend(&mut agg.inconsistencies, &findings.inconsistencies);
        notes.tax.extend(&mut agg.tax_notes, &findings.tax_notes);
        notes.medicaid.extend(&mut agg.medicaid_notes, &findings.medicaid_notes);
        notes.state.extend(&mut agg.state_notes, &findings.state_notes);

        agg.units.push(UnitEntry {
            run_type: outcome.run_type,
            summary: findings.summary.clone(),
            score: findings.score,
            findings: findings.findings.clone(),
        });
    }

    agg.recommendations = recommendations.finish();
    Ok(agg)
}

/// Build the externally visible report from the three phase aggregates
pub fn synthesize(
    phase1: &PhaseAggregate,
    phase2: &PhaseAggregate,
    phase3: &PhaseAggregate,
) -> FinalReport {
    let phases = [phase1, phase2, phase3];
    let mut report = FinalReport::default();
    let mut recommendations = RecommendationMerger::default();
    let mut notes = NoteSets::default();

    for phase in phases {
        for rec in &phase.recommendations {
            recommendations.add(rec, None);
        }
        notes.missing.extend(&mut report.missing_documents, &phase.missing_documents);
        notes.outdated.extend(&mut report.outdated_documents, &phase.outdated_documents);
        notes.inconsistencies.extend(&mut report.inconsistencies, &phase.inconsistencies);
        notes.tax.extend(&mut report.tax_notes, &phase.tax_notes);
        notes.medicaid.extend(&mut report.medicaid_notes, &phase.medicaid_notes);
        notes.state.extend(&mut report.state_notes, &phase.state_notes);
        report.failed_units.extend(phase.failed_units.iter().copied());
    }

    report.recommendations = recommendations.finish();
    report.degraded = !report.failed_units.is_empty();

    let severity_counts = phases.iter().fold(BTreeMap::new(), |mut acc, phase| {
        for (severity, count) in &phase.severity_counts {
            *acc.entry(*severity).or_insert(0u32) += count;
        }
        acc
    });
    report.score = explicit_score(phase3).unwrap_or_else(|| derived_score(&report, &severity_counts));

    report
}

/// Score reported by a synthesis unit, executive summary first
fn explicit_score(phase3: &PhaseAggregate) -> Option<u8> {
    [RunType::ExecutiveSummary, RunType::GapAnalysis]
        .iter()
        .find_map(|t| phase3.unit(*t).and_then(|u| u.score))
        .map(|s| s.min(100))
}

fn derived_score(report: &FinalReport, severity_counts: &BTreeMap<Severity, u32>) -> u8 {
    let serious: u32 = severity_counts
        .iter()
        .filter(|(severity, _)| **severity >= Severity::High)
        .map(|(_, count)| *count)
        .sum();

    let penalty = 10 * report.missing_documents.len() as i64
        + 5 * report.outdated_documents.len() as i64
        + 5 * report.inconsistencies.len() as i64
        + 3 * i64::from(serious);

    (100 - penalty).clamp(0, 100) as u8
}

/// Case- and whitespace-insensitive key
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Default)]
struct DedupList {
    seen: HashSet<String>,
}

impl DedupList {
    fn extend(&mut self, target: &mut Vec<String>, items: &[String]) {
        for item in items {
            let key = normalize(item);
            if key.is_empty() {
                continue;
            }
            if self.seen.insert(key) {
                target.push(item.trim().to_string());
            }
        }
    }
}

#[derive(Default)]
struct NoteSets {
    missing: DedupList,
    outdated: DedupList,
    inconsistencies: DedupList,
    tax: DedupList,
    medicaid: DedupList,
    state: DedupList,
}

/// Collapses recommendations sharing a title; highest priority wins
#[derive(Default)]
struct RecommendationMerger {
    index: HashMap<String, usize>,
    merged: Vec<Recommendation>,
}

impl RecommendationMerger {
    fn add(&mut self, rec: &Recommendation, source: Option<RunType>) {
        let mut sources = rec.sources.clone();
        if let Some(source) = source {
            sources.push(source);
        }

        let key = normalize(&rec.title);
        match self.index.get(&key) {
            Some(&idx) => {
                let existing = &mut self.merged[idx];
                if rec.priority > existing.priority {
                    existing.priority = rec.priority;
                    existing.detail = rec.detail.clone();
                }
                for s in sources {
                    if !existing.sources.contains(&s) {
                        existing.sources.push(s);
                    }
                }
            }
            None => {
                let mut fresh = rec.clone();
                fresh.title = rec.title.trim().to_string();
                fresh.sources.clear();
                for s in sources {
                    if !fresh.sources.contains(&s) {
                        fresh.sources.push(s);
                    }
                }
                self.index.insert(key, self.merged.len());
                self.merged.push(fresh);
            }
        }
    }

    fn finish(self) -> Vec<Recommendation> {
        let mut merged = self.merged;
        for rec in &mut merged {
            rec.sources.sort();
        }
        // Stable: equal priorities keep first-seen order
        merged.sort_by(|a, b| b.priority.cmp(&a.priority));
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Finding, Priority, UnitFindings};

    fn rec(priority: Priority, title: &str) -> Recommendation {
        Recommendation {
            priority,
            title: title.to_string(),
            detail: format!("{} detail", title),
            sources: Vec::new(),
        }
    }

    fn finding(severity: Severity) -> Finding {
        Finding {
            category: "documents".to_string(),
            severity,
            title: "issue".to_string(),
            detail: String::new(),
        }
    }

    fn ok(run_type: RunType, ordinal: u32, findings: UnitFindings) -> UnitOutcome {
        UnitOutcome {
            run_type,
            ordinal,
            result: Ok(findings),
        }
    }

    fn failed(run_type: RunType, ordinal: u32) -> UnitOutcome {
        UnitOutcome {
            run_type,
            ordinal,
            result: Err("collaborator unavailable".to_string()),
        }
    }

    #[test]
    fn test_duplicate_recommendations_collapse() {
        let outcomes = vec![
            ok(
                RunType::EstateTax,
                0,
                UnitFindings {
                    recommendations: vec![rec(Priority::Medium, "Fund the revocable trust")],
                    ..Default::default()
                },
            ),
            ok(
                RunType::ProbateExposure,
                4,
                UnitFindings {
                    recommendations: vec![
                        rec(Priority::High, "  fund the  Revocable trust "),
                        rec(Priority::Low, "Review titling"),
                    ],
                    ..Default::default()
                },
            ),
        ];

        let agg = aggregate(2, &outcomes).unwrap();
        assert_eq!(agg.recommendations.len(), 2);
        let trust = &agg.recommendations[0];
        assert_eq!(trust.title, "Fund the revocable trust");
        assert_eq!(trust.priority, Priority::High);
        assert_eq!(trust.sources, vec![RunType::EstateTax, RunType::ProbateExposure]);
        assert_eq!(agg.recommendations[1].priority, Priority::Low);
    }

    #[test]
    fn test_completion_order_does_not_matter() {
        let a = ok(
            RunType::EstateTax,
            0,
            UnitFindings {
                tax_notes: vec!["state estate tax applies".to_string()],
                ..Default::default()
            },
        );
        let b = ok(
            RunType::MedicaidPlanning,
            1,
            UnitFindings {
                medicaid_notes: vec!["five-year lookback".to_string()],
                ..Default::default()
            },
        );
        let c = failed(RunType::IncapacityPlanning, 2);

        let forward = aggregate(2, &[a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = aggregate(2, &[c, b, a]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.failed_units, vec![RunType::IncapacityPlanning]);
        assert_eq!(forward.units[0].run_type, RunType::EstateTax);
    }

    #[test]
    fn test_severity_counts_and_notes_dedupe() {
        let outcomes = vec![
            ok(
                RunType::DocumentInventory,
                0,
                UnitFindings {
                    findings: vec![finding(Severity::High), finding(Severity::Low)],
                    missing_documents: vec!["HIPAA authorization".to_string()],
                    ..Default::default()
                },
            ),
            ok(
                RunType::AssetReview,
                1,
                UnitFindings {
                    findings: vec![finding(Severity::High)],
                    missing_documents: vec!["hipaa  AUTHORIZATION".to_string()],
                    ..Default::default()
                },
            ),
        ];

        let agg = aggregate(1, &outcomes).unwrap();
        assert_eq!(agg.severity_counts.get(&Severity::High), Some(&2));
        assert_eq!(agg.severity_counts.get(&Severity::Low), Some(&1));
        assert_eq!(agg.missing_documents, vec!["HIPAA authorization".to_string()]);
    }

    #[test]
    fn test_rejects_structural_mismatch() {
        let wrong = vec![ok(RunType::GapAnalysis, 0, UnitFindings::default())];
        assert!(matches!(
            aggregate(2, &wrong),
            Err(AggregationError::WrongPhase { .. })
        ));

        let dup = vec![
            ok(RunType::EstateTax, 0, UnitFindings::default()),
            failed(RunType::EstateTax, 0),
        ];
        assert_eq!(aggregate(2, &dup), Err(AggregationError::Duplicate(RunType::EstateTax)));
    }

    #[test]
    fn test_empty_phase_aggregates_to_empty() {
        let agg = aggregate(2, &[]).unwrap();
        assert_eq!(agg.phase_number, 2);
        assert!(agg.units.is_empty());
        assert!(agg.failed_units.is_empty());
    }

    #[test]
    fn test_synthesize_prefers_executive_summary_score() {
        let p1 = aggregate(1, &[]).unwrap();
        let p2 = aggregate(2, &[]).unwrap();
        let p3 = aggregate(
            3,
            &[
                ok(
                    RunType::GapAnalysis,
                    0,
                    UnitFindings {
                        score: Some(40),
                        ..Default::default()
                    },
                ),
                ok(
                    RunType::ExecutiveSummary,
                    2,
                    UnitFindings {
                        score: Some(72),
                        ..Default::default()
                    },
                ),
            ],
        )
        .unwrap();

        let report = synthesize(&p1, &p2, &p3);
        assert_eq!(report.score, 72);
        assert!(!report.degraded);
    }

    #[test]
    fn test_synthesize_derives_score_and_marks_degraded() {
        let p1 = aggregate(
            1,
            &[
                ok(
                    RunType::DocumentInventory,
                    0,
                    UnitFindings {
                        findings: vec![finding(Severity::Critical)],
                        missing_documents: vec!["Will".to_string(), "Trust".to_string()],
                        outdated_documents: vec!["Power of attorney".to_string()],
                        ..Default::default()
                    },
                ),
                failed(RunType::AssetReview, 1),
            ],
        )
        .unwrap();
        let p2 = aggregate(
            2,
            &[ok(
                RunType::EstateTax,
                0,
                UnitFindings {
                    missing_documents: vec!["will".to_string()],
                    inconsistencies: vec!["IRA beneficiary conflicts with will".to_string()],
                    ..Default::default()
                },
            )],
        )
        .unwrap();
        let p3 = aggregate(3, &[ok(RunType::Recommendations, 1, UnitFindings::default())]).unwrap();

        let report = synthesize(&p1, &p2, &p3);
        // 100 - 2*10 - 5 - 5 - 3
        assert_eq!(report.score, 67);
        assert_eq!(report.missing_documents, vec!["Will".to_string(), "Trust".to_string()]);
        assert_eq!(report.failed_units, vec![RunType::AssetReview]);
        assert!(report.degraded);
    }

    #[test]
    fn test_derived_score_is_clamped() {
        let missing: Vec<String> = (0..15).map(|i| format!("document {}", i)).collect();
        let p1 = aggregate(
            1,
            &[ok(
                RunType::DocumentInventory,
                0,
                UnitFindings {
                    missing_documents: missing,
                    ..Default::default()
                },
            )],
        )
        .unwrap();
        let empty2 = aggregate(2, &[]).unwrap();
        let empty3 = aggregate(3, &[]).unwrap();
        assert_eq!(synthesize(&p1, &empty2, &empty3).score, 0);
    }
}
