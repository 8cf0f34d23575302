//! Worker types and data structures.
//!
//! Descriptors, runtime state and the outcome values returned by the
//! lifecycle manager.

use chrono::{DateTime, Utc};
use lookout_core::config::{CommandConfig, ReadinessConfig, WorkerConfig};
use lookout_core::{HealthState, LookoutError, WorkerKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::server_session_id;

/// Identifies one worker kind: where it listens and how to launch it.
///
/// Immutable after construction and held for the orchestrator's lifetime.
#[derive(Debug, Clone)]
pub struct WorkerDescriptor {
    /// Worker kind
    pub kind: WorkerKind,
    /// Base URL of the worker's HTTP API
    pub base_url: String,
    /// Process identifier file the worker maintains
    pub pid_file: Option<PathBuf>,
    /// Spawn command
    pub command: Option<CommandConfig>,
    /// Destination for spawned worker output
    pub log_file: Option<PathBuf>,
    /// Readiness budget after a spawn
    pub readiness: ReadinessConfig,
    /// Stop a healthy worker before reusing it
    pub reset_on_reuse: bool,
    /// Pause after the reset stop
    pub reset_pause: Duration,
    /// Spawn command starts a session on its own
    pub spawn_starts_session: bool,
}

impl WorkerDescriptor {
    /// Build a descriptor from resolved configuration.
    pub fn from_config(kind: WorkerKind, config: &WorkerConfig) -> Self {
        Self {
            kind,
            base_url: config.base_url(),
            pid_file: config.pid_file.clone(),
            command: config.command.clone(),
            log_file: config.log_file.clone(),
            readiness: config.readiness,
            reset_on_reuse: config.reset_on_reuse,
            reset_pause: config.reset_pause(),
            spawn_starts_session: config.spawn_starts_session,
        }
    }

    /// Descriptor for a worker at `base_url` with stock settings for `kind`.
    pub fn new(kind: WorkerKind, base_url: impl Into<String>) -> Self {
        let mut descriptor = Self::from_config(kind, &WorkerConfig::defaults_for(kind));
        descriptor.base_url = base_url.into();
        descriptor
    }

    pub fn with_pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn without_pid_file(mut self) -> Self {
        self.pid_file = None;
        self
    }

    pub fn with_command(mut self, command: CommandConfig) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_readiness(mut self, max_attempts: u32, spacing: Duration) -> Self {
        self.readiness = ReadinessConfig {
            max_attempts,
            spacing_ms: spacing.as_millis() as u64,
        };
        self
    }

    pub fn with_reset_on_reuse(mut self, reset: bool, pause: Duration) -> Self {
        self.reset_on_reuse = reset;
        self.reset_pause = pause;
        self
    }

    pub fn with_spawn_starts_session(mut self, starts: bool) -> Self {
        self.spawn_starts_session = starts;
        self
    }
}

/// A worker process this orchestrator spawned itself.
///
/// Only owned processes may be signalled without consulting a pid file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedProcess {
    pub pid: u32,
    pub spawned_at: DateTime<Utc>,
}

/// Mutable per-kind state, owned by that kind's lifecycle manager.
#[derive(Debug, Clone, Default)]
pub struct WorkerRuntimeState {
    pub health: HealthState,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub owned_process: Option<OwnedProcess>,
}

impl WorkerRuntimeState {
    /// Record the result of a health probe.
    pub fn record_probe(&mut self, healthy: bool) {
        self.health = if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };
        self.last_probe_at = Some(Utc::now());
    }
}

/// Subject identity sent with `/start` for registration and single auth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectIdentity {
    pub subject_id: String,
    pub display_name: String,
}

impl SubjectIdentity {
    pub fn new(subject_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Acknowledgement of a successful `/start` (or of joining a running session).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StartAck {
    /// Server session id carried by the reply
    pub session_id: Option<String>,
    /// Message carried by the reply
    pub message: Option<String>,
    /// True when an already-running session was joined without `/start`
    pub joined: bool,
}

impl StartAck {
    /// Parse a `/start` reply body.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            session_id: server_session_id(payload),
            message: payload
                .get("message")
                .and_then(Value::as_str)
                .map(String::from),
            joined: false,
        }
    }

    /// Ack for a session that was already running.
    pub fn joined(status_payload: &Value) -> Self {
        Self {
            joined: true,
            ..Self::from_payload(status_payload)
        }
    }
}

/// Terminal outcome of [`ensure_running`](crate::WorkerLifecycleManager::ensure_running).
#[derive(Debug, Clone, PartialEq)]
pub enum EnsureOutcome {
    /// A healthy worker was found, reset if required, and started
    AlreadyHealthyReused(StartAck),
    /// A new process was spawned, became healthy and started
    SpawnedAndHealthy(StartAck),
    /// The process could not be launched
    SpawnFailed { reason: String },
    /// The process launched but `/health` never answered within budget
    NeverBecameHealthy {
        attempts: u32,
        log_tail: Option<String>,
    },
    /// The worker refused `/start` (status 0 means it became unreachable)
    StartRejected {
        status_code: u16,
        message: String,
        payload: Value,
    },
}

impl EnsureOutcome {
    /// True when the worker is running a session.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            Self::AlreadyHealthyReused(_) | Self::SpawnedAndHealthy(_)
        )
    }

    /// The start acknowledgement, if the worker is running.
    pub fn ack(&self) -> Option<&StartAck> {
        match self {
            Self::AlreadyHealthyReused(ack) | Self::SpawnedAndHealthy(ack) => Some(ack),
            _ => None,
        }
    }

    /// Failure classification for callers, `None` when running.
    pub fn to_error(&self, kind: WorkerKind) -> Option<LookoutError> {
        match self {
            Self::AlreadyHealthyReused(_) | Self::SpawnedAndHealthy(_) => None,
            Self::SpawnFailed { reason } => Some(LookoutError::spawn_failed(kind, reason.clone())),
            Self::NeverBecameHealthy { attempts, .. } => Some(LookoutError::ReadinessTimeout {
                worker: kind.to_string(),
                attempts: *attempts,
            }),
            Self::StartRejected {
                status_code: 0,
                message,
                ..
            } => Some(LookoutError::transport(kind, message.clone())),
            Self::StartRejected {
                status_code,
                message,
                ..
            } => Some(LookoutError::WorkerRejection {
                worker: kind.to_string(),
                status_code: *status_code,
                message: message.clone(),
            }),
        }
    }
}

impl std::fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyHealthyReused(_) => write!(f, "already healthy, reused"),
            Self::SpawnedAndHealthy(_) => write!(f, "spawned and healthy"),
            Self::SpawnFailed { reason } => write!(f, "spawn failed: {reason}"),
            Self::NeverBecameHealthy { attempts, .. } => {
                write!(f, "never became healthy after {attempts} attempts")
            }
            Self::StartRejected {
                status_code,
                message,
                ..
            } => write!(f, "start rejected ({status_code}): {message}"),
        }
    }
}

/// Result of a best-effort stop. Stopping never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    /// The worker answered `/stop` with 2xx
    pub acknowledged: bool,
    pub message: String,
}

/// Where a force-stopped pid came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PidSource {
    PidFile,
    OwnedHandle,
}

/// Successful result of a force-stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceStopOutcome {
    /// No pid file and no owned process: nothing to do
    NothingToStop,
    /// Termination signal delivered
    Terminated { pid: u32, source: PidSource },
    /// The recorded process no longer existed
    AlreadyExited { pid: u32, source: PidSource },
}

impl std::fmt::Display for ForceStopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NothingToStop => write!(f, "no running process found"),
            Self::Terminated { pid, .. } => write!(f, "terminated process {pid}"),
            Self::AlreadyExited { pid, .. } => write!(f, "process {pid} had already exited"),
        }
    }
}
