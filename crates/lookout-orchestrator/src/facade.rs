//! The orchestration façade.
//!
//! Every public action is a short saga: abandon any previous action of the
//! same kind, create a session, ensure the worker is running (including
//! `/start`), and only then launch the frame and status cadences.

use futures_util::future::join_all;
use lookout_core::config::{OrchestratorConfig, PollingConfig, WorkerConfig};
use lookout_core::{ActionPhase, LookoutError, Result, WorkerKind};
use lookout_worker::{
    CommandSpawner, EnsureOutcome, ForceStopOutcome, ProcessSpawner, SubjectIdentity,
    WorkerLifecycleManager,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

use crate::action::{ActionScope, ActionSnapshot, FailureKind, Frame};
use crate::cadence::{finalize, frame_cadence, status_cadence};
use crate::payload::{RecognizedSubject, StatusReport};

/// Per-kind state. Slots never share locks.
#[derive(Debug)]
struct WorkerSlot {
    manager: Arc<WorkerLifecycleManager>,
    config: WorkerConfig,
    action: Mutex<Option<Arc<ActionScope>>>,
}

impl WorkerSlot {
    fn current(&self) -> Option<Arc<ActionScope>> {
        self.action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace(&self, scope: Option<Arc<ActionScope>>) -> Option<Arc<ActionScope>> {
        std::mem::replace(
            &mut *self.action.lock().unwrap_or_else(|e| e.into_inner()),
            scope,
        )
    }

    /// True when a newer action has taken the slot from `scope`.
    fn superseded(&self, scope: &Arc<ActionScope>) -> bool {
        self.action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|s| !Arc::ptr_eq(s, scope))
    }

    /// Clear the slot only if it still holds `scope`.
    fn clear_if(&self, scope: &Arc<ActionScope>) {
        let mut slot = self.action.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, scope)) {
            *slot = None;
        }
    }
}

/// Normalised `/status` of a worker, independent of any action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub kind: WorkerKind,
    /// The worker answered `/status`
    pub reachable: bool,
    pub active: bool,
    pub status: String,
    pub message: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recognized: Vec<RecognizedSubject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
}

impl WorkerStatus {
    fn from_report(kind: WorkerKind, report: StatusReport) -> Self {
        let active = report
            .active
            .unwrap_or(matches!(report.status.as_str(), "running" | "capturing"));
        // Crowd counting only reports `active`.
        let status = match report.active {
            Some(true) if report.status == "unknown" => "running".to_string(),
            Some(false) if report.status == "unknown" => "inactive".to_string(),
            _ => report.status,
        };
        Self {
            kind,
            reachable: true,
            active,
            status,
            message: report.message,
            progress: report.progress,
            session_id: report.session_id,
            recognized: report.recognized.unwrap_or_default(),
            current_count: report.current_count,
            max_count: report.max_count,
        }
    }

    fn unreachable(kind: WorkerKind, message: String) -> Self {
        Self {
            kind,
            reachable: false,
            active: false,
            status: "inactive".to_string(),
            message,
            progress: 0.0,
            session_id: None,
            recognized: Vec::new(),
            current_count: None,
            max_count: None,
        }
    }
}

async fn query_status(kind: WorkerKind, slot: &WorkerSlot) -> WorkerStatus {
    let result = slot.manager.fetch_status().await;
    if result.ok {
        WorkerStatus::from_report(kind, StatusReport::parse(&result.payload))
    } else {
        WorkerStatus::unreachable(kind, result.message())
    }
}

/// Entry point for starting, observing and stopping worker actions.
///
/// Holds one lifecycle manager and at most one active action per worker
/// kind. Operations on different kinds never contend.
#[derive(Debug)]
pub struct Orchestrator {
    slots: BTreeMap<WorkerKind, WorkerSlot>,
    polling: PollingConfig,
}

impl Orchestrator {
    /// Build an orchestrator whose workers are launched as real processes.
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self::with_spawner(config, Arc::new(CommandSpawner::new()))
    }

    /// Build an orchestrator that launches workers through `spawner`.
    pub fn with_spawner(config: &OrchestratorConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let slots = WorkerKind::all()
            .into_iter()
            .map(|kind| {
                let manager = WorkerLifecycleManager::from_config(kind, config)
                    .with_spawner(spawner.clone());
                let slot = WorkerSlot {
                    manager: Arc::new(manager),
                    config: config.worker(kind),
                    action: Mutex::new(None),
                };
                (kind, slot)
            })
            .collect();
        Self {
            slots,
            polling: config.polling.clone(),
        }
    }

    fn slot_for(&self, kind: WorkerKind) -> Result<&WorkerSlot> {
        self.slots
            .get(&kind)
            .ok_or_else(|| LookoutError::internal(format!("no worker slot for {kind}")))
    }

    /// Lifecycle manager for a kind.
    pub fn manager(&self, kind: WorkerKind) -> Result<Arc<WorkerLifecycleManager>> {
        Ok(self.slot_for(kind)?.manager.clone())
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Start a face registration capture for `subject`.
    pub async fn start_registration(&self, subject: SubjectIdentity) -> Result<ActionSnapshot> {
        self.start_with_subject(WorkerKind::Registration, subject).await
    }

    /// Start single-subject authentication for `subject`.
    pub async fn start_single_auth(&self, subject: SubjectIdentity) -> Result<ActionSnapshot> {
        self.start_with_subject(WorkerKind::SingleAuth, subject).await
    }

    /// Start multi-subject authentication.
    pub async fn start_multi_auth(&self) -> Result<ActionSnapshot> {
        self.start(WorkerKind::MultiAuth, None).await
    }

    /// Start crowd counting.
    pub async fn start_crowd_count(&self) -> Result<ActionSnapshot> {
        self.start(WorkerKind::CrowdCount, None).await
    }

    async fn start_with_subject(
        &self,
        kind: WorkerKind,
        subject: SubjectIdentity,
    ) -> Result<ActionSnapshot> {
        if subject.subject_id.trim().is_empty() {
            return Err(LookoutError::InvalidRequest {
                worker: kind.to_string(),
                message: "A subject id is required".into(),
            });
        }
        let payload = serde_json::to_value(&subject)
            .map_err(|e| LookoutError::internal(format!("encoding subject: {e}")))?;
        self.start(kind, Some(payload)).await
    }

    /// Run the action saga for `kind`.
    ///
    /// Worker problems are reported through the returned snapshot's phase and
    /// result; `Err` is reserved for unusable input.
    #[instrument(level = "info", skip(self, payload), fields(worker = %kind))]
    pub async fn start(&self, kind: WorkerKind, payload: Option<Value>) -> Result<ActionSnapshot> {
        let slot = self.slot_for(kind)?;
        if kind.requires_subject() && payload.is_none() {
            return Err(LookoutError::InvalidRequest {
                worker: kind.to_string(),
                message: format!("{} requires a subject identity", kind.display_name()),
            });
        }

        let scope = Arc::new(ActionScope::new(kind));
        if let Some(previous) = slot.replace(Some(scope.clone())) {
            info!("abandoning previous action");
            previous.abandon();
        }

        let outcome = slot.manager.ensure_running(payload.as_ref()).await;
        let ack = match outcome {
            Ok(outcome) => match outcome.ack() {
                Some(ack) => ack.clone(),
                None => {
                    let message = outcome
                        .to_error(kind)
                        .map(|e| e.user_message())
                        .unwrap_or_else(|| outcome.to_string());
                    let log_tail = match &outcome {
                        EnsureOutcome::NeverBecameHealthy { log_tail, .. } => log_tail.clone(),
                        _ => None,
                    };
                    scope.fail_with_tail(FailureKind::from_outcome(&outcome), message, log_tail);
                    return Ok(scope.snapshot());
                }
            },
            Err(e) => {
                scope.fail(FailureKind::Internal, e.to_string());
                return Ok(scope.snapshot());
            }
        };

        if scope.is_settled() {
            // Abandoned while the worker was being ensured. A newer action
            // owns the worker now and resets it itself.
            if !slot.superseded(&scope) {
                slot.manager.stop().await;
            }
            return Ok(scope.snapshot());
        }

        scope.acknowledge_start(&ack);

        let handles = vec![
            tokio::spawn(frame_cadence(
                scope.clone(),
                slot.manager.clone(),
                self.polling.clone(),
            )),
            tokio::spawn(status_cadence(
                scope.clone(),
                slot.manager.clone(),
                self.polling.clone(),
                slot.config.status_interval(),
                slot.config.auto_finalize_after(),
            )),
        ];
        if !scope.begin_polling(handles) && !slot.superseded(&scope) {
            slot.manager.stop().await;
        }

        Ok(scope.snapshot())
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Current state of the action for `kind`, or an idle snapshot.
    pub fn snapshot(&self, kind: WorkerKind) -> ActionSnapshot {
        self.slots
            .get(&kind)
            .and_then(WorkerSlot::current)
            .map(|scope| scope.snapshot())
            .unwrap_or_else(|| ActionSnapshot::idle(kind))
    }

    /// Latest frame of the active action for `kind`.
    pub fn current_frame(&self, kind: WorkerKind) -> Option<Frame> {
        self.slots
            .get(&kind)
            .and_then(WorkerSlot::current)
            .and_then(|scope| scope.frame())
    }

    /// Wait until the action for `kind` reaches a terminal phase.
    pub async fn wait_for_terminal(&self, kind: WorkerKind) -> Result<ActionSnapshot> {
        let scope = self
            .slot_for(kind)?
            .current()
            .ok_or_else(|| LookoutError::NoActiveAction {
                worker: kind.to_string(),
            })?;
        Ok(scope.wait_terminal().await)
    }

    /// Phase change notifications for the current action of `kind`.
    pub fn subscribe(&self, kind: WorkerKind) -> Option<tokio::sync::watch::Receiver<ActionPhase>> {
        self.slots
            .get(&kind)
            .and_then(WorkerSlot::current)
            .map(|scope| scope.subscribe())
    }

    /// Query a worker's `/status` directly, filling defaults.
    ///
    /// An unreachable worker is reported as `inactive`, not as an error.
    pub async fn worker_status(&self, kind: WorkerKind) -> Result<WorkerStatus> {
        Ok(query_status(kind, self.slot_for(kind)?).await)
    }

    /// Status of every worker kind, queried concurrently.
    pub async fn all_worker_status(&self) -> Vec<WorkerStatus> {
        join_all(self.slots.iter().map(|(&kind, slot)| query_status(kind, slot))).await
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stop the action for `kind` and wait, bounded, for its final result.
    ///
    /// Never fails. With no active action the worker is still asked to stop.
    #[instrument(level = "info", skip(self), fields(worker = %kind))]
    pub async fn stop(&self, kind: WorkerKind) -> Result<ActionSnapshot> {
        let slot = self.slot_for(kind)?;
        match slot.current() {
            Some(scope) if !scope.is_settled() => {
                Ok(finalize(scope, slot.manager.clone(), self.polling.clone()).await)
            }
            Some(scope) => {
                slot.manager.stop().await;
                Ok(scope.snapshot())
            }
            None => {
                let report = slot.manager.stop().await;
                let mut snapshot = ActionSnapshot::idle(kind);
                snapshot.message = report.message;
                Ok(snapshot)
            }
        }
    }

    /// Abandon the current session so the caller can start over.
    ///
    /// Cadences are cancelled and buffers cleared before `/stop` is sent;
    /// replies still in flight for the old session are discarded.
    #[instrument(level = "info", skip(self), fields(worker = %kind))]
    pub async fn try_again(&self, kind: WorkerKind) -> Result<ActionSnapshot> {
        let slot = self.slot_for(kind)?;
        if let Some(scope) = slot.current() {
            scope.abandon();
            slot.clear_if(&scope);
        }
        let report = slot.manager.stop().await;
        if !report.acknowledged {
            warn!(message = %report.message, "worker did not acknowledge stop");
        }
        Ok(ActionSnapshot::idle(kind))
    }

    /// Abandon any action and forcibly terminate the worker process.
    #[instrument(level = "info", skip(self), fields(worker = %kind))]
    pub async fn force_stop(&self, kind: WorkerKind) -> Result<ForceStopOutcome> {
        let slot = self.slot_for(kind)?;
        if let Some(scope) = slot.replace(None) {
            scope.abandon();
        }
        slot.manager.force_stop().await
    }

    /// Abandon every action and ask every worker to stop.
    pub async fn shutdown(&self) {
        let stops = self.slots.values().map(|slot| async move {
            if let Some(scope) = slot.replace(None) {
                scope.abandon();
            }
            slot.manager.stop().await
        });
        join_all(stops).await;
    }
}
