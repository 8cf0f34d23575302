//! # lookout-core
//!
//! Core types, errors, and utilities for the Lookout worker orchestrator.
//!
//! This crate provides:
//! - [`LookoutError`] - Error taxonomy shared by every Lookout crate
//! - [`logging`] - Tracing setup and log management utilities
//! - [`types`] - Worker kinds, health and action phases
//! - [`config`] - YAML configuration with per-worker defaults
//! - [`backoff`] - Jittered exponential delays for polling cadences
//!
//! ## Example
//!
//! ```no_run
//! use lookout_core::{config::OrchestratorConfig, logging, types::WorkerKind};
//!
//! fn main() -> lookout_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!
//!     let config = OrchestratorConfig::load(None)?;
//!     let crowd = config.worker(WorkerKind::CrowdCount);
//!     tracing::info!(address = %crowd.address, "crowd counting worker");
//!
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export main types for convenience
pub use error::{LookoutError, Result};
pub use logging::{LogGuard, init_logging};
pub use types::{ActionPhase, HealthState, WorkerKind};
