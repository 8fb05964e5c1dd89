//! Work unit executor
//!
//! Runs exactly one analysis call for one work unit. The call itself is made by
//! an [`AnalysisCollaborator`]; the executor adds the per-unit timeout,
//! cancellation, retry of transient failures and output validation.
//!
//! Failures come back as a typed [`UnitError`] value, never as a panic or an
//! error the Phase Runner has to propagate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{ClientContext, ParsedIntake, PhaseAggregate, RunType, UnitFindings};

/// Everything the collaborator needs for one unit
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest<'a> {
    pub run_id: Uuid,
    pub run_type: RunType,
    pub intake: &'a ParsedIntake,
    pub context: &'a ClientContext,
    /// Aggregates of every earlier phase, in phase order (empty for phase 1)
    pub prior: &'a [PhaseAggregate],
}

/// Collaborator reply for one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorResponse {
    pub findings: UnitFindings,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    /// Rendered prompt/context snapshot kept for audit
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    /// Transport failure, throttling or server-side fault
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed collaborator response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Unavailable(_))
    }
}

/// External analysis call
#[async_trait]
pub trait AnalysisCollaborator: Send + Sync {
    /// Wait until a call may be issued (client-side throttling)
    ///
    /// Awaited before each attempt and not counted against the unit timeout.
    async fn ready(&self) {}

    async fn invoke(
        &self,
        request: &AnalysisRequest<'_>,
    ) -> Result<CollaboratorResponse, CollaboratorError>;
}

/// Unit-level failure, recorded on the RunResult
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UnitError {
    #[error("unit timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("{message}")]
    Collaborator { message: String, retryable: bool },

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("unit cancelled")]
    Cancelled,
}

impl UnitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UnitError::Timeout(_) => true,
            UnitError::Collaborator { retryable, .. } => *retryable,
            UnitError::MalformedOutput(_) | UnitError::Cancelled => false,
        }
    }
}

impl From<CollaboratorError> for UnitError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Malformed(message) => UnitError::MalformedOutput(message),
            other => UnitError::Collaborator {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionMetadata {
    /// Wall-clock time across all attempts
    pub duration_ms: u64,
    /// Cost reported by the successful attempt
    pub cost_usd: Option<f64>,
    pub attempts: u32,
    pub prompt: Option<String>,
}

/// Result and metadata of one unit execution
#[derive(Debug, Clone, PartialEq)]
pub struct UnitExecution {
    pub result: Result<UnitFindings, UnitError>,
    pub metadata: ExecutionMetadata,
}

pub struct WorkUnitExecutor {
    collaborator: Arc<dyn AnalysisCollaborator>,
    unit_timeout: Duration,
    max_retries: u32,
    retry_backoff: Duration,
}

impl WorkUnitExecutor {
    pub fn new(
        collaborator: Arc<dyn AnalysisCollaborator>,
        unit_timeout: Duration,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            collaborator,
            unit_timeout,
            max_retries,
            retry_backoff,
        }
    }

    /// Execute one unit; retryable failures are retried with linear backoff
    pub async fn execute(
        &self,
        request: &AnalysisRequest<'_>,
        cancel: &CancellationToken,
    ) -> UnitExecution {
        let started = Instant::now();
        let mut attempts = 0u32;

        let result = loop {
            attempts += 1;

            match self.attempt(request, cancel).await {
                Ok(response) => break Ok(response),
                Err(err) if err.is_retryable() && attempts <= self.max_retries => {
                    let backoff = self.retry_backoff * attempts;
                    warn!(
                        run_id = %request.run_id,
                        run_type = %request.run_type,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Unit attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(UnitError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(err) => break Err(err),
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(response) => {
                debug!(
                    run_id = %request.run_id,
                    run_type = %request.run_type,
                    duration_ms,
                    attempts,
                    "Unit call succeeded"
                );
                UnitExecution {
                    result: Ok(response.findings),
                    metadata: ExecutionMetadata {
                        duration_ms,
                        cost_usd: response.cost_usd,
                        attempts,
                        prompt: response.prompt,
                    },
                }
            }
            Err(err) => UnitExecution {
                result: Err(err),
                metadata: ExecutionMetadata {
                    duration_ms,
                    cost_usd: None,
                    attempts,
                    prompt: None,
                },
            },
        }
    }

    async fn attempt(
        &self,
        request: &AnalysisRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<CollaboratorResponse, UnitError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UnitError::Cancelled),
            _ = self.collaborator.ready() => {}
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UnitError::Cancelled),
            outcome = tokio::time::timeout(self.unit_timeout, self.collaborator.invoke(request)) => {
                match outcome {
                    Err(_) => return Err(UnitError::Timeout(self.unit_timeout)),
                    Ok(reply) => reply?,
                }
            }
        };

        response
            .findings
            .validate()
            .map_err(UnitError::MalformedOutput)?;

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Goals, MaritalStatus, PersonalInfo};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed sequence of replies, then repeats the last one
    struct Replay {
        replies: Mutex<Vec<Result<CollaboratorResponse, CollaboratorError>>>,
        calls: AtomicU32,
        delay: Duration,
        /// Time spent throttled before each call
        throttle: Duration,
    }

    impl Replay {
        fn new(mut replies: Vec<Result<CollaboratorResponse, CollaboratorError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                throttle: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl AnalysisCollaborator for Replay {
        async fn ready(&self) {
            if !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
        }

        async fn invoke(
            &self,
            _request: &AnalysisRequest<'_>,
        ) -> Result<CollaboratorResponse, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop().unwrap()
            } else {
                replies.last().cloned().unwrap()
            }
        }
    }

    fn ok_reply(summary: &str) -> Result<CollaboratorResponse, CollaboratorError> {
        Ok(CollaboratorResponse {
            findings: UnitFindings {
                summary: summary.to_string(),
                ..Default::default()
            },
            cost_usd: Some(0.02),
            prompt: Some("prompt".to_string()),
        })
    }

    fn intake() -> ParsedIntake {
        ParsedIntake {
            personal: PersonalInfo {
                full_name: "Test Client".to_string(),
                age: Some(45),
                state_of_residence: "OH".to_string(),
                marital_status: MaritalStatus::Single,
            },
            family: Default::default(),
            assets: Vec::new(),
            goals: Goals::default(),
            documents: Vec::new(),
            beneficiaries: Vec::new(),
        }
    }

    async fn run(executor: &WorkUnitExecutor, cancel: &CancellationToken) -> UnitExecution {
        let intake = intake();
        let context = ClientContext::new("owner", "client", &intake);
        let request = AnalysisRequest {
            run_id: Uuid::new_v4(),
            run_type: RunType::AssetReview,
            intake: &intake,
            context: &context,
            prior: &[],
        };
        executor.execute(&request, cancel).await
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let collaborator = Arc::new(Replay::new(vec![
            Err(CollaboratorError::Unavailable("503".to_string())),
            ok_reply("done"),
        ]));
        let executor = WorkUnitExecutor::new(collaborator.clone(), Duration::from_secs(5), 1, Duration::from_millis(1));

        let execution = run(&executor, &CancellationToken::new()).await;
        assert_eq!(execution.result.unwrap().summary, "done");
        assert_eq!(execution.metadata.attempts, 2);
        assert_eq!(execution.metadata.cost_usd, Some(0.02));
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let collaborator = Arc::new(Replay::new(vec![Err(CollaboratorError::Rejected {
            status: 422,
            message: "bad context".to_string(),
        })]));
        let executor = WorkUnitExecutor::new(collaborator.clone(), Duration::from_secs(5), 3, Duration::from_millis(1));

        let execution = run(&executor, &CancellationToken::new()).await;
        assert!(matches!(
            execution.result,
            Err(UnitError::Collaborator { retryable: false, .. })
        ));
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let collaborator = Arc::new(Replay::new(vec![Err(CollaboratorError::Unavailable(
            "down".to_string(),
        ))]));
        let executor = WorkUnitExecutor::new(collaborator.clone(), Duration::from_secs(5), 2, Duration::from_millis(1));

        let execution = run(&executor, &CancellationToken::new()).await;
        assert!(execution.result.is_err());
        assert_eq!(execution.metadata.attempts, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_typed() {
        let mut replay = Replay::new(vec![ok_reply("late")]);
        replay.delay = Duration::from_millis(200);
        let executor = WorkUnitExecutor::new(Arc::new(replay), Duration::from_millis(20), 0, Duration::ZERO);

        let execution = run(&executor, &CancellationToken::new()).await;
        assert!(matches!(execution.result, Err(UnitError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_call() {
        let mut replay = Replay::new(vec![ok_reply("never")]);
        replay.delay = Duration::from_secs(30);
        let executor = WorkUnitExecutor::new(Arc::new(replay), Duration::from_secs(60), 0, Duration::ZERO);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let execution = run(&executor, &cancel).await;
        assert_eq!(execution.result, Err(UnitError::Cancelled));
    }

    #[tokio::test]
    async fn test_invalid_findings_are_malformed_output() {
        let reply = Ok(CollaboratorResponse {
            findings: UnitFindings {
                score: Some(180),
                ..Default::default()
            },
            cost_usd: None,
            prompt: None,
        });
        let executor = WorkUnitExecutor::new(Arc::new(Replay::new(vec![reply])), Duration::from_secs(5), 2, Duration::ZERO);

        let execution = run(&executor, &CancellationToken::new()).await;
        assert!(matches!(execution.result, Err(UnitError::MalformedOutput(_))));
        assert_eq!(execution.metadata.attempts, 1);
    }

    #[tokio::test]
    async fn test_throttling_does_not_count_against_timeout() {
        // Given: every call waits 150ms for the limiter, the call itself is quick
        let mut replay = Replay::new(vec![ok_reply("throttled")]);
        replay.throttle = Duration::from_millis(150);
        replay.delay = Duration::from_millis(10);
        let executor = WorkUnitExecutor::new(Arc::new(replay), Duration::from_millis(50), 0, Duration::ZERO);

        // When
        let execution = run(&executor, &CancellationToken::new()).await;

        // Then: only the call is timed
        assert_eq!(execution.result.unwrap().summary, "throttled");
        assert_eq!(execution.metadata.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_throttle_wait() {
        let mut replay = Replay::new(vec![ok_reply("never")]);
        replay.throttle = Duration::from_secs(30);
        let replay = Arc::new(replay);
        let executor = WorkUnitExecutor::new(replay.clone(), Duration::from_secs(60), 0, Duration::ZERO);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let execution = run(&executor, &cancel).await;
        assert_eq!(execution.result, Err(UnitError::Cancelled));
        assert_eq!(replay.calls.load(Ordering::SeqCst), 0);
    }
}
