//! Background analysis worker
//!
//! Claims queued jobs from the durable queue and drives each claimed run on
//! its own task. Wakes when a submission signals a new job, and otherwise
//! polls at the configured interval.
//!
//! Jobs a dead process left `claimed` are re-queued by
//! [`AnalysisWorker::recover_stale_jobs`] before the loop starts, so every
//! accepted run is driven at least once.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db;
use crate::error::OrchestrationError;
use crate::models::AnalysisJob;
use crate::services::run_coordinator::RunCoordinator;

pub struct AnalysisWorker {
    coordinator: Arc<RunCoordinator>,
    job_signal: Arc<Notify>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl AnalysisWorker {
    pub fn new(coordinator: Arc<RunCoordinator>, poll_interval: Duration) -> Self {
        let job_signal = coordinator.job_signal();
        Self {
            coordinator,
            job_signal,
            poll_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the claim loop when cancelled
    ///
    /// Runs already being driven are left alone; if the process exits before
    /// they finish, their jobs are recovered on the next start.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Re-queue jobs claimed by a previous process
    ///
    /// Must run before the claim loop starts. Returns how many were recovered.
    pub async fn recover_stale_jobs(&self) -> anyhow::Result<usize> {
        let db = self.coordinator.db();
        let run_ids = db::jobs::requeue_stale(db).await?;

        for run_id in &run_ids {
            db::runs::increment_retry_count(db, *run_id).await?;
            warn!(run_id = %run_id, "Re-queued analysis job left claimed by a previous process");
        }
        if !run_ids.is_empty() {
            info!(recovered = run_ids.len(), "Stale analysis jobs recovered");
        }
        Ok(run_ids.len())
    }

    /// Claim loop; returns once the shutdown token is cancelled
    pub async fn run(self) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Analysis worker started");
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            let claimed = match db::jobs::claim_next(self.coordinator.db()).await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "Failed to claim analysis job");
                    None
                }
            };

            if let Some(job) = claimed {
                let coordinator = Arc::clone(&self.coordinator);
                in_flight.spawn(async move { process_job(&coordinator, job).await });
                continue;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.job_signal.notified() => debug!("Worker woken by new job"),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(in_flight = in_flight.len(), "Analysis worker stopped claiming jobs");
        in_flight.detach_all();
    }

    /// Claim and drive queued jobs one after another until the queue is empty
    ///
    /// Returns the number of jobs processed.
    pub async fn drain(&self) -> anyhow::Result<usize> {
        let mut processed = 0;
        while let Some(job) = db::jobs::claim_next(self.coordinator.db()).await? {
            process_job(&self.coordinator, job).await;
            processed += 1;
        }
        Ok(processed)
    }
}

async fn process_job(coordinator: &RunCoordinator, job: AnalysisJob) {
    let run_id = job.run_id;
    info!(run_id = %run_id, job_id = %job.job_id, attempt = job.attempts, "Analysis job claimed");

    let cancel = coordinator.register_run(run_id).await;
    let outcome = coordinator.drive(run_id, &cancel).await;
    coordinator.release_run(run_id).await;

    match outcome {
        Ok(status) => info!(run_id = %run_id, status = %status, "Analysis job finished"),
        Err(OrchestrationError::Storage(e)) => {
            // Left claimed; recovered on the next start
            error!(run_id = %run_id, error = %e, "Analysis job interrupted by storage failure");
            return;
        }
        Err(e) => error!(run_id = %run_id, error = %e, "Analysis job could not be driven"),
    }

    if let Err(e) = db::jobs::finish(coordinator.db(), job.job_id).await {
        error!(job_id = %job.job_id, error = %e, "Failed to mark analysis job finished");
    }
}
