//! Progress bookkeeping and event emission for a driven run

use async_trait::async_trait;
use chrono::Utc;
use epa_common::events::{AnalysisEvent, EventBus, PhaseCountsData, UnitOutcomeKind};
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::warn;
use uuid::Uuid;

use crate::db;
use crate::models::RunStatus;
use crate::services::phase_runner::{UnitDone, UnitProgressListener};
use crate::services::progress::progress;

/// Recomputes overall progress after every unit and publishes it
///
/// Parallel units finish in any order, so the published value is held to a
/// high-water mark.
pub(super) struct ProgressTracker<'a> {
    db: &'a SqlitePool,
    event_bus: &'a EventBus,
    high_water: AtomicU8,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(db: &'a SqlitePool, event_bus: &'a EventBus, floor: u8) -> Self {
        Self {
            db,
            event_bus,
            high_water: AtomicU8::new(floor),
        }
    }
}

#[async_trait]
impl UnitProgressListener for ProgressTracker<'_> {
    async fn on_unit_done(&self, run_id: Uuid, done: UnitDone<'_>) {
        let overall = progress(
            done.phase_number,
            done.counts.terminal_runs(),
            done.counts.total_runs,
        );
        if let Err(e) = db::runs::update_progress(self.db, run_id, overall).await {
            warn!(run_id = %run_id, error = %e, "Failed to persist run progress");
        }

        self.event_bus.emit_lossy(AnalysisEvent::UnitFinished {
            run_id,
            phase_number: done.phase_number,
            run_type: done.run_type.as_str().to_string(),
            outcome: match done.error {
                None => UnitOutcomeKind::Completed,
                Some(_) => UnitOutcomeKind::Failed,
            },
            error: done.error.map(str::to_string),
            timestamp: Utc::now(),
        });

        let phases = match phase_snapshot(self.db, run_id).await {
            Ok(phases) => phases,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load phase counters for progress event");
                return;
            }
        };
        // No await between the bump and the send
        let overall = self.high_water.fetch_max(overall, Ordering::SeqCst).max(overall);
        publish_progress(self.event_bus, run_id, overall, Some(done.phase_number), phases);
    }
}

/// Per-phase counters as carried on progress events
pub async fn phase_snapshot(db: &SqlitePool, run_id: Uuid) -> epa_common::Result<Vec<PhaseCountsData>> {
    let phases = db::phases::load_phases(db, run_id).await?;
    Ok(phases
        .into_iter()
        .map(|p| PhaseCountsData {
            phase_number: p.phase_number,
            status: p.status.as_str().to_string(),
            total_runs: p.total_runs,
            completed_runs: p.completed_runs,
            failed_runs: p.failed_runs,
        })
        .collect())
}

pub(super) async fn emit_progress(
    db: &SqlitePool,
    event_bus: &EventBus,
    run_id: Uuid,
    overall_progress: u8,
    current_phase: Option<u8>,
) {
    let phases = match phase_snapshot(db, run_id).await {
        Ok(phases) => phases,
        Err(e) => {
            warn!(run_id = %run_id, error = %e, "Failed to load phase counters for progress event");
            return;
        }
    };

    publish_progress(event_bus, run_id, overall_progress, current_phase, phases);
}

fn publish_progress(
    event_bus: &EventBus,
    run_id: Uuid,
    overall_progress: u8,
    current_phase: Option<u8>,
    phases: Vec<PhaseCountsData>,
) {
    event_bus.emit_lossy(AnalysisEvent::RunProgress {
        run_id,
        overall_progress,
        current_phase,
        phases,
        timestamp: Utc::now(),
    });
}

pub(super) fn emit_status_changed(event_bus: &EventBus, run_id: Uuid, from: RunStatus, to: RunStatus) {
    event_bus.emit_lossy(AnalysisEvent::RunStatusChanged {
        run_id,
        old_status: from.as_str().to_string(),
        new_status: to.as_str().to_string(),
        timestamp: Utc::now(),
    });
}
