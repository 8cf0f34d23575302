//! Per-kind worker lifecycle: reuse, spawn, start, stop and force-stop.
//!
//! One [`WorkerLifecycleManager`] exists per worker kind and nothing is
//! shared between kinds. `ensure_running` and `force_stop` serialise on a
//! per-kind gate, so a second caller arriving mid-spawn waits for the first
//! and then finds the worker healthy instead of spawning a duplicate on the
//! same fixed address.

use lookout_core::config::{OrchestratorConfig, TimeoutConfig};
use lookout_core::log_worker_event;
use lookout_core::{LookoutError, Result, WorkerKind};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::log_tail::{DEFAULT_TAIL_CAP, read_log_tail};
use crate::pidfile;
use crate::probe::{ProbeClient, ProbeRequest, ProbeResult};
use crate::readiness::ReadinessWaiter;
use crate::spawner::{CommandSpawner, ProcessSpawner};
use crate::types::{
    EnsureOutcome, ForceStopOutcome, OwnedProcess, PidSource, StartAck, StopReport,
    WorkerDescriptor, WorkerRuntimeState,
};

/// Owns the spawn/reuse/terminate decisions for one worker kind.
#[derive(Debug)]
pub struct WorkerLifecycleManager {
    descriptor: WorkerDescriptor,
    timeouts: TimeoutConfig,
    client: ProbeClient,
    waiter: ReadinessWaiter,
    spawner: Arc<dyn ProcessSpawner>,
    /// Serialises ensure_running and force_stop for this kind
    gate: tokio::sync::Mutex<()>,
    state: Mutex<WorkerRuntimeState>,
}

impl WorkerLifecycleManager {
    /// Create a manager that launches workers with [`CommandSpawner`].
    pub fn new(descriptor: WorkerDescriptor, timeouts: TimeoutConfig) -> Self {
        let client = ProbeClient::new();
        let waiter = ReadinessWaiter::new(client.clone(), timeouts.readiness_probe());
        Self {
            descriptor,
            timeouts,
            client,
            waiter,
            spawner: Arc::new(CommandSpawner::new()),
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(WorkerRuntimeState::default()),
        }
    }

    /// Create a manager for `kind` from resolved configuration.
    pub fn from_config(kind: WorkerKind, config: &OrchestratorConfig) -> Self {
        Self::new(
            WorkerDescriptor::from_config(kind, &config.worker(kind)),
            config.timeouts.clone(),
        )
    }

    /// Replace the process spawner.
    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn kind(&self) -> WorkerKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    /// Snapshot of the runtime state.
    pub fn runtime_state(&self) -> WorkerRuntimeState {
        self.lock_state().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerRuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn call(&self, path: &str, request: ProbeRequest) -> ProbeResult {
        self.client
            .probe(&self.descriptor.base_url, path, request)
            .await
    }

    /// Probe `/health` once and record the result.
    pub async fn probe_health(&self) -> bool {
        let result = self
            .call("/health", ProbeRequest::get(self.timeouts.health()))
            .await;
        self.lock_state().record_probe(result.ok);
        result.ok
    }

    /// `GET /status`.
    pub async fn fetch_status(&self) -> ProbeResult {
        self.call("/status", ProbeRequest::get(self.timeouts.status()))
            .await
    }

    /// `GET /current-frame`, bypassing caches.
    pub async fn fetch_frame(&self) -> ProbeResult {
        self.call(
            "/current-frame",
            ProbeRequest::get(self.timeouts.frame()).no_cache(),
        )
        .await
    }

    /// Make sure the worker is running a session for the caller.
    ///
    /// `payload` is the `/start` body (`{}` when `None`). Transport and
    /// readiness problems come back as outcomes; `Err` is reserved for
    /// unexpected spawner errors.
    #[instrument(level = "info", skip(self, payload), fields(worker = %self.descriptor.kind))]
    pub async fn ensure_running(&self, payload: Option<&Value>) -> Result<EnsureOutcome> {
        let _gate = self.gate.lock().await;
        let kind = self.descriptor.kind;

        if self.probe_health().await {
            return Ok(self.reuse(payload).await);
        }

        info!("worker not healthy, spawning");
        let spawned = match self.spawner.spawn(&self.descriptor).await {
            Ok(spawned) => spawned,
            Err(LookoutError::SpawnFailed { message, .. }) => {
                warn!(error = %message, "worker spawn failed");
                return Ok(EnsureOutcome::SpawnFailed { reason: message });
            }
            Err(e) => return Err(e),
        };
        log_worker_event!(kind, "spawned", pid = spawned.pid);

        self.lock_state().owned_process = Some(OwnedProcess {
            pid: spawned.pid,
            spawned_at: chrono::Utc::now(),
        });

        let readiness = self.descriptor.readiness;
        let ready = self
            .waiter
            .wait_until_healthy(&self.descriptor, readiness.max_attempts, readiness.spacing())
            .await;
        self.lock_state().record_probe(ready);

        if !ready {
            let log_tail = match &self.descriptor.log_file {
                Some(path) => read_log_tail(path, DEFAULT_TAIL_CAP).await,
                None => None,
            };
            return Ok(EnsureOutcome::NeverBecameHealthy {
                attempts: readiness.max_attempts,
                log_tail,
            });
        }

        if self.descriptor.spawn_starts_session {
            if let Some(ack) = self.join_active_session().await {
                return Ok(EnsureOutcome::SpawnedAndHealthy(ack));
            }
        }

        Ok(match self.start_session(payload).await {
            Ok(ack) => EnsureOutcome::SpawnedAndHealthy(ack),
            Err(rejected) => rejected,
        })
    }

    async fn reuse(&self, payload: Option<&Value>) -> EnsureOutcome {
        if self.descriptor.reset_on_reuse {
            debug!("resetting healthy worker before reuse");
            self.call("/stop", ProbeRequest::post(self.timeouts.stop()))
                .await;
            tokio::time::sleep(self.descriptor.reset_pause).await;
        } else if let Some(ack) = self.join_active_session().await {
            info!(session_id = ?ack.session_id, "joined running session");
            return EnsureOutcome::AlreadyHealthyReused(ack);
        }

        match self.start_session(payload).await {
            Ok(ack) => EnsureOutcome::AlreadyHealthyReused(ack),
            Err(rejected) => rejected,
        }
    }

    async fn join_active_session(&self) -> Option<StartAck> {
        let status = self.fetch_status().await;
        (status.ok && status.bool_field("active") == Some(true))
            .then(|| StartAck::joined(&status.payload))
    }

    async fn start_session(&self, payload: Option<&Value>) -> std::result::Result<StartAck, EnsureOutcome> {
        let body = payload.cloned().unwrap_or_else(|| json!({}));
        let result = self
            .call("/start", ProbeRequest::post(self.timeouts.start()).with_body(body))
            .await;

        if result.ok && result.bool_field("success") != Some(false) {
            let ack = StartAck::from_payload(&result.payload);
            info!(session_id = ?ack.session_id, "worker session started");
            return Ok(ack);
        }

        let message = result.message();
        warn!(status = result.status_code, error = %message, "worker rejected start");
        Err(EnsureOutcome::StartRejected {
            status_code: result.status_code,
            message,
            payload: result.payload,
        })
    }

    /// Ask the worker to stop. Never fails; a worker that is not running is
    /// simply reported as not acknowledging.
    #[instrument(level = "debug", skip(self), fields(worker = %self.descriptor.kind))]
    pub async fn stop(&self) -> StopReport {
        self.graceful_stop(self.timeouts.stop()).await
    }

    async fn graceful_stop(&self, timeout: std::time::Duration) -> StopReport {
        let result = self.call("/stop", ProbeRequest::post(timeout)).await;
        let report = StopReport {
            acknowledged: result.ok,
            message: if result.ok {
                result
                    .str_field("message")
                    .unwrap_or("stopped")
                    .to_string()
            } else {
                result.message()
            },
        };
        debug!(acknowledged = report.acknowledged, message = %report.message, "stop");
        report
    }

    /// Graceful stop, then unconditional termination of the recorded process.
    ///
    /// With a pid file configured, the file is authoritative: missing means
    /// nothing to stop, malformed is [`LookoutError::MalformedState`]. Without
    /// one, only a process this manager spawned itself is signalled.
    #[instrument(level = "info", skip(self), fields(worker = %self.descriptor.kind))]
    pub async fn force_stop(&self) -> Result<ForceStopOutcome> {
        let _gate = self.gate.lock().await;
        let kind = self.descriptor.kind;

        self.graceful_stop(self.timeouts.force_stop()).await;

        let owned = self.lock_state().owned_process;
        let (pid, source) = match &self.descriptor.pid_file {
            Some(path) => match pidfile::read_pid(path).await? {
                Some(pid) => (pid, PidSource::PidFile),
                None => {
                    debug!(path = %path.display(), "no pid file, nothing to force-stop");
                    return Ok(ForceStopOutcome::NothingToStop);
                }
            },
            None => match owned {
                Some(owned) => (owned.pid, PidSource::OwnedHandle),
                None => return Ok(ForceStopOutcome::NothingToStop),
            },
        };

        let delivered = pidfile::terminate(pid).await?;
        if let Some(path) = &self.descriptor.pid_file {
            pidfile::remove_pid_file(path).await;
        }
        {
            let mut state = self.lock_state();
            state.owned_process = None;
            state.record_probe(false);
        }

        if delivered {
            log_worker_event!(kind, "force_stopped", pid = pid);
            Ok(ForceStopOutcome::Terminated { pid, source })
        } else {
            info!(pid, "process had already exited");
            Ok(ForceStopOutcome::AlreadyExited { pid, source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::HealthState;
    use std::time::Duration;

    fn unreachable_manager(kind: WorkerKind) -> WorkerLifecycleManager {
        let descriptor = WorkerDescriptor::new(kind, "http://127.0.0.1:9")
            .without_pid_file()
            .with_readiness(1, Duration::ZERO);
        let timeouts = TimeoutConfig {
            stop_ms: 200,
            force_stop_ms: 200,
            ..TimeoutConfig::default()
        };
        WorkerLifecycleManager::new(descriptor, timeouts)
    }

    #[tokio::test]
    async fn test_stop_unreachable_worker_is_not_an_error() {
        let manager = unreachable_manager(WorkerKind::Registration);
        let report = manager.stop().await;
        assert!(!report.acknowledged);
    }

    #[tokio::test]
    async fn test_force_stop_without_pid_or_owned_process() {
        let manager = unreachable_manager(WorkerKind::MultiAuth);
        let outcome = manager.force_stop().await.unwrap();
        assert_eq!(outcome, ForceStopOutcome::NothingToStop);
    }

    #[tokio::test]
    async fn test_probe_health_records_state() {
        let manager = unreachable_manager(WorkerKind::SingleAuth);
        assert_eq!(manager.runtime_state().health, HealthState::Unknown);
        assert!(!manager.probe_health().await);
        let state = manager.runtime_state();
        assert_eq!(state.health, HealthState::Unhealthy);
        assert!(state.last_probe_at.is_some());
    }
}
