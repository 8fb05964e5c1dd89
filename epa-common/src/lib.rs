//! # EPA Common Library
//!
//! Shared code for the estate-plan-analysis services including:
//! - Common error and result types
//! - Event types (AnalysisEvent enum) and the EventBus
//! - Configuration loading and root folder resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
