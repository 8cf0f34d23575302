//! Action sagas and the orchestration façade for Lookout.
//!
//! Each user-visible action moves through
//! `Idle → EnsuringWorker → Polling → Finalizing → {Completed, Stopped, Failed}`:
//!
//! - [`Orchestrator`] - the boundary callers use (start, snapshot, frame,
//!   stop, try again, force-stop)
//! - [`ActionScope`] - one action's session, view, frame buffer and cadences
//! - [`payload`] - tolerant parsing of worker `/status` and `/current-frame`
//!
//! ## Example
//!
//! ```no_run
//! use lookout_core::{config::OrchestratorConfig, WorkerKind};
//! use lookout_orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> lookout_core::Result<()> {
//!     let orchestrator = Orchestrator::new(&OrchestratorConfig::load(None)?);
//!
//!     let snapshot = orchestrator.start_multi_auth().await?;
//!     println!("phase: {}", snapshot.phase);
//!
//!     let done = orchestrator.wait_for_terminal(WorkerKind::MultiAuth).await?;
//!     println!("recognised {} subjects", done.recognized.len());
//!     Ok(())
//! }
//! ```

pub mod action;
mod cadence;
pub mod facade;
pub mod payload;

pub use action::{ActionResult, ActionScope, ActionSnapshot, FailureKind, Frame};
pub use cadence::finalize;
pub use facade::{Orchestrator, WorkerStatus};
pub use payload::{FrameReport, RecognizedSubject, StatusReport};
