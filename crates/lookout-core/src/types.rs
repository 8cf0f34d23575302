//! Shared type definitions used across Lookout crates.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The fixed set of vision worker kinds the orchestrator knows about.
///
/// Each kind runs as its own long-lived local service on a fixed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerKind {
    /// Face registration capture for one subject
    Registration,
    /// Authentication of a single registered subject
    SingleAuth,
    /// Simultaneous authentication of several subjects
    MultiAuth,
    /// Real-time people counting
    CrowdCount,
}

impl WorkerKind {
    /// Every worker kind, in a stable order.
    pub fn all() -> [WorkerKind; 4] {
        [
            Self::Registration,
            Self::SingleAuth,
            Self::MultiAuth,
            Self::CrowdCount,
        ]
    }

    /// Stable identifier used in configuration, logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::SingleAuth => "single-auth",
            Self::MultiAuth => "multi-auth",
            Self::CrowdCount => "crowd-count",
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Registration => "Face Registration",
            Self::SingleAuth => "Single Face Authentication",
            Self::MultiAuth => "Multi-Face Authentication",
            Self::CrowdCount => "Crowd Counting",
        }
    }

    /// One-line description of what the worker does.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Registration => "Capture face samples for a new subject",
            Self::SingleAuth => "Authenticate a single registered user",
            Self::MultiAuth => "Authenticate multiple registered users simultaneously",
            Self::CrowdCount => "Count number of people in real-time (no registration required)",
        }
    }

    /// Whether starting this kind needs a subject identity.
    pub fn requires_subject(&self) -> bool {
        matches!(self, Self::Registration | Self::SingleAuth)
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registration" | "register" => Ok(Self::Registration),
            "single-auth" | "single" => Ok(Self::SingleAuth),
            "multi-auth" | "multi" => Ok(Self::MultiAuth),
            "crowd-count" | "crowd" => Ok(Self::CrowdCount),
            other => Err(format!(
                "unknown worker kind '{other}' (expected registration, single-auth, multi-auth or crowd-count)"
            )),
        }
    }
}

/// Last observed health of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Never probed
    #[default]
    Unknown,
    /// Answered `/health` with 2xx
    Healthy,
    /// Unreachable or answered with an error
    Unhealthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Phase of a user-visible action.
///
/// `Idle → EnsuringWorker → Polling → Finalizing → {Completed, Stopped, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    #[default]
    Idle,
    EnsuringWorker,
    Polling,
    Finalizing,
    Completed,
    Stopped,
    Failed,
}

impl ActionPhase {
    /// Returns true for the sticky end states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl std::fmt::Display for ActionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::EnsuringWorker => write!(f, "ensuring_worker"),
            Self::Polling => write!(f, "polling"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
