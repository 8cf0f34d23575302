//! Worker probing and lifecycle management for Lookout.
//!
//! Vision workers are independently running local HTTP services on fixed
//! ports. This crate provides the infrastructure to:
//!
//! - Probe a worker's control endpoints without ever failing past the call
//! - Wait, with a hard ceiling, for a freshly spawned worker to become ready
//! - Spawn workers detached from the orchestrator's own lifetime
//! - Reuse, reset, stop and force-stop workers per kind
//! - Pin server-issued session ids and discard stale responses
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐
//! │  WorkerLifecycleManager  │  one per worker kind
//! │ (ensure, stop, force)    │
//! └──────┬────────────┬──────┘
//!        │            │
//!        ▼            ▼
//! ┌─────────────┐ ┌───────────────┐
//! │ Readiness   │ │ ProcessSpawner│
//! │ Waiter      │ │ (detached)    │
//! └──────┬──────┘ └───────────────┘
//!        ▼
//! ┌─────────────┐
//! │ ProbeClient │  GET /health, POST /start, POST /stop ...
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lookout_core::{config::OrchestratorConfig, WorkerKind};
//! use lookout_worker::{EnsureOutcome, WorkerLifecycleManager};
//!
//! #[tokio::main]
//! async fn main() -> lookout_core::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let manager = WorkerLifecycleManager::from_config(WorkerKind::CrowdCount, &config);
//!
//!     match manager.ensure_running(None).await? {
//!         EnsureOutcome::AlreadyHealthyReused(ack) | EnsureOutcome::SpawnedAndHealthy(ack) => {
//!             println!("crowd counting running (session {:?})", ack.session_id);
//!         }
//!         other => println!("could not start: {other:?}"),
//!     }
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```

pub mod lifecycle;
pub mod log_tail;
pub mod pidfile;
pub mod probe;
pub mod readiness;
pub mod session;
pub mod spawner;
pub mod types;

// Re-export main types for convenience
pub use lifecycle::WorkerLifecycleManager;
pub use probe::{ProbeClient, ProbeRequest, ProbeResult};
pub use readiness::ReadinessWaiter;
pub use session::{Admission, Session, SessionId};
pub use spawner::{CommandSpawner, ProcessSpawner, SpawnedProcess};
pub use types::{
    EnsureOutcome, ForceStopOutcome, OwnedProcess, PidSource, StartAck, StopReport,
    SubjectIdentity, WorkerDescriptor, WorkerRuntimeState,
};
