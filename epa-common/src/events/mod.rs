//! Event types for the EPA event system
//!
//! Provides shared event definitions and the EventBus used to push analysis
//! progress to SSE subscribers. Polling persisted state remains authoritative;
//! events are a low-latency convenience and may be dropped.

mod run_types;

pub use run_types::{PhaseCountsData, UnitOutcomeKind};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Analysis lifecycle events
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    /// Run accepted and queued for background execution
    RunSubmitted {
        run_id: Uuid,
        owner_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run status transition (e.g. phase1_running → phase1_complete)
    RunStatusChanged {
        run_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A work unit reached a terminal state
    UnitFinished {
        run_id: Uuid,
        phase_number: u8,
        run_type: String,
        outcome: UnitOutcomeKind,
        /// Error text for failed units
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Overall progress recomputed after a unit or phase finished
    RunProgress {
        run_id: Uuid,
        /// Overall percentage (0-100)
        overall_progress: u8,
        /// Phase currently executing
        current_phase: Option<u8>,
        phases: Vec<PhaseCountsData>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run reached `completed` or `partial`
    RunFinished {
        run_id: Uuid,
        status: String,
        report_id: Uuid,
        failed_units: u32,
        duration_seconds: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Run reached `failed` (including cancellation)
    RunFailed {
        run_id: Uuid,
        error_message: String,
        cancelled: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl AnalysisEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            AnalysisEvent::RunSubmitted { .. } => "RunSubmitted",
            AnalysisEvent::RunStatusChanged { .. } => "RunStatusChanged",
            AnalysisEvent::UnitFinished { .. } => "UnitFinished",
            AnalysisEvent::RunProgress { .. } => "RunProgress",
            AnalysisEvent::RunFinished { .. } => "RunFinished",
            AnalysisEvent::RunFailed { .. } => "RunFailed",
        }
    }

    /// Run the event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            AnalysisEvent::RunSubmitted { run_id, .. }
            | AnalysisEvent::RunStatusChanged { run_id, .. }
            | AnalysisEvent::UnitFinished { run_id, .. }
            | AnalysisEvent::RunProgress { run_id, .. }
            | AnalysisEvent::RunFinished { run_id, .. }
            | AnalysisEvent::RunFailed { run_id, .. } => *run_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`:
/// - Non-blocking publish (slow subscribers don't block the orchestrator)
/// - Lagging subscribers lose the oldest events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalysisEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use epa_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AnalysisEvent,
    ) -> Result<usize, broadcast::error::SendError<AnalysisEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AnalysisEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
