//! HTTP API handlers for epa-analysis
//!
//! REST endpoints for submitting, polling and cancelling analysis runs, plus
//! an SSE event stream and a health check.

pub mod health;
pub mod runs;
pub mod sse;

pub use health::health_routes;
pub use runs::run_routes;
pub use sse::run_event_stream;
