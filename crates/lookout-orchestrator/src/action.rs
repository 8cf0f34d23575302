//! One user-visible action against one worker kind.
//!
//! An [`ActionScope`] owns the [`Session`], the caller-visible view and the
//! frame buffer, plus the handles of the polling cadences started for it.
//! Every mutation goes through one lock and is refused once the cadences are
//! cancelled or the session has settled, so after [`ActionScope::cancel_cadences`]
//! returns no poll result can land.

use chrono::{DateTime, Utc};
use lookout_core::{ActionPhase, WorkerKind};
use lookout_worker::{Admission, EnsureOutcome, Session, StartAck};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::payload::{FrameReport, RecognizedSubject, StatusReport, Verdict};

/// Why an action failed on the orchestrator side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worker unreachable, or the connection was lost while polling
    TransportFailure,
    /// Worker refused `/start`
    WorkerRejection,
    /// Worker process launched but never became healthy
    ReadinessTimeout,
    /// Worker process could not be launched
    SpawnFailed,
    /// Worker never acknowledged a stop within the finalize budget
    FinalizeTimeout,
    /// Unexpected orchestrator error
    Internal,
}

impl FailureKind {
    /// Classify a non-running ensure outcome.
    pub fn from_outcome(outcome: &EnsureOutcome) -> Self {
        match outcome {
            EnsureOutcome::SpawnFailed { .. } => Self::SpawnFailed,
            EnsureOutcome::NeverBecameHealthy { .. } => Self::ReadinessTimeout,
            EnsureOutcome::StartRejected { status_code: 0, .. } => Self::TransportFailure,
            EnsureOutcome::StartRejected { .. } => Self::WorkerRejection,
            EnsureOutcome::AlreadyHealthyReused(_) | EnsureOutcome::SpawnedAndHealthy(_) => {
                Self::Internal
            }
        }
    }
}

/// Final result of an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Set when the orchestrator, not the worker, ended the action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Worker output captured when it never became healthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}

/// Latest frame received for an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    /// Base64-encoded image
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Caller-visible state of an action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSnapshot {
    pub kind: WorkerKind,
    /// Local session id, absent when no action exists
    pub session_id: Option<u64>,
    pub server_session_id: Option<String>,
    pub phase: ActionPhase,
    pub status: String,
    pub message: String,
    pub progress: f64,
    pub recognized: Vec<RecognizedSubject>,
    pub current_count: Option<u64>,
    pub max_count: Option<u64>,
    pub has_frame: bool,
    pub result: Option<ActionResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ActionSnapshot {
    /// Snapshot for a kind with no action.
    pub fn idle(kind: WorkerKind) -> Self {
        Self {
            kind,
            session_id: None,
            server_session_id: None,
            phase: ActionPhase::Idle,
            status: "idle".to_string(),
            message: String::new(),
            progress: 0.0,
            recognized: Vec::new(),
            current_count: None,
            max_count: None,
            has_frame: false,
            result: None,
            started_at: None,
            updated_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Whether a cadence should keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
}

#[derive(Debug)]
struct ActionState {
    session: Session,
    view: ActionSnapshot,
    frame: Option<Frame>,
    cadences_cancelled: bool,
    /// A poll or the start acknowledgement showed a capture in progress
    seen_active: bool,
    /// The frame stream reported the worker inactive
    frames_ended: bool,
}

impl ActionState {
    fn accepting(&self) -> bool {
        !self.cadences_cancelled && !self.session.is_settled()
    }

    fn touch(&mut self) {
        self.view.updated_at = Some(Utc::now());
    }
}

/// Scope of one action: session, view, frame buffer and cadence tasks.
#[derive(Debug)]
pub struct ActionScope {
    kind: WorkerKind,
    state: Mutex<ActionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    phase_tx: watch::Sender<ActionPhase>,
}

impl ActionScope {
    /// Create a scope in `EnsuringWorker`.
    pub fn new(kind: WorkerKind) -> Self {
        let session = Session::new(kind);
        let now = Utc::now();
        let view = ActionSnapshot {
            session_id: Some(session.id.as_u64()),
            phase: ActionPhase::EnsuringWorker,
            status: "starting".to_string(),
            started_at: Some(now),
            updated_at: Some(now),
            ..ActionSnapshot::idle(kind)
        };
        let (phase_tx, _) = watch::channel(ActionPhase::EnsuringWorker);

        debug!(worker = %kind, session_id = %session.id, "action created");
        Self {
            kind,
            state: Mutex::new(ActionState {
                session,
                view,
                frame: None,
                cadences_cancelled: false,
                seen_active: false,
                frames_ended: false,
            }),
            tasks: Mutex::new(Vec::new()),
            phase_tx,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, ActionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, state: &mut ActionState, phase: ActionPhase) {
        if state.view.phase != phase {
            debug!(worker = %self.kind, from = %state.view.phase, to = %phase, "phase change");
            state.view.phase = phase;
            state.touch();
            self.phase_tx.send_replace(phase);
        }
    }

    pub fn snapshot(&self) -> ActionSnapshot {
        let state = self.lock();
        let mut view = state.view.clone();
        view.has_frame = state.frame.is_some();
        view
    }

    pub fn phase(&self) -> ActionPhase {
        self.lock().view.phase
    }

    /// Frame buffer contents.
    pub fn frame(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    pub fn is_settled(&self) -> bool {
        self.lock().session.is_settled()
    }

    /// Record the `/start` acknowledgement and pin its session id.
    pub fn acknowledge_start(&self, ack: &StartAck) {
        let mut state = self.lock();
        if let Some(id) = &ack.session_id {
            state.session.adopt(id);
            state.view.server_session_id = state.session.server_session_id().map(String::from);
        }
        if let Some(message) = &ack.message {
            state.view.message = message.clone();
        }
        state.seen_active |= ack.joined;
        state.touch();
    }

    /// Move to `Polling` and take ownership of the cadence tasks.
    ///
    /// Returns false, aborting the tasks, if the action was abandoned or
    /// settled while the worker was being ensured.
    pub fn begin_polling(&self, handles: Vec<JoinHandle<()>>) -> bool {
        let mut state = self.lock();
        if !state.accepting() {
            drop(state);
            handles.iter().for_each(JoinHandle::abort);
            return false;
        }
        self.set_phase(&mut state, ActionPhase::Polling);
        state.view.status = "running".to_string();
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);
        true
    }

    /// Stop both cadences. Synchronous: no poll result is applied after this
    /// returns.
    pub fn cancel_cadences(&self) {
        self.lock().cadences_cancelled = true;
        self.abort_tasks();
    }

    fn abort_tasks(&self) {
        let handles: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
    }

    /// Cancel the cadences, clear the frame buffer and enter `Finalizing`.
    ///
    /// Returns false when the action is already finalizing or terminal.
    pub fn begin_finalizing(&self) -> bool {
        self.cancel_cadences();
        let mut state = self.lock();
        if state.session.is_settled() || state.view.phase == ActionPhase::Finalizing {
            return false;
        }
        state.frame = None;
        self.set_phase(&mut state, ActionPhase::Finalizing);
        state.view.status = "stopping".to_string();
        true
    }

    /// Apply a frame poll result.
    pub fn apply_frame(&self, report: FrameReport) -> Flow {
        let mut state = self.lock();
        if !state.accepting() {
            return Flow::Halt;
        }
        match state.session.admit(report.session_id.as_deref()) {
            Admission::Apply => {}
            Admission::Stale => {
                debug!(worker = %self.kind, session_id = ?report.session_id, "discarding stale frame");
                return Flow::Continue;
            }
            Admission::Settled => return Flow::Halt,
        }
        state.view.server_session_id = state.session.server_session_id().map(String::from);

        if report.max_count.is_some() {
            state.view.max_count = report.max_count;
        }
        if report.current_count.is_some() {
            state.view.current_count = report.current_count;
        }

        if !report.active {
            // The worker stopped streaming. Status polling still decides
            // between a result and a plain stop.
            state.frame = None;
            state.frames_ended = true;
            state.touch();
            return Flow::Halt;
        }
        state.seen_active = true;

        state.frame = report.frame.map(|image| Frame {
            image,
            session_id: report.session_id,
            received_at: Utc::now(),
        });
        state.touch();
        Flow::Continue
    }

    /// Apply a status poll result during `Polling`.
    ///
    /// Returns `Halt` when the action reached a terminal state.
    pub fn apply_status(&self, report: StatusReport) -> Flow {
        let mut state = self.lock();
        if !state.accepting() {
            return Flow::Halt;
        }
        if self.merge_status(&mut state, &report) == Admission::Stale {
            return Flow::Continue;
        }

        let verdict = report.verdict().or_else(|| {
            // A worker that ran and went idle without a result stopped on
            // its own. Before anything was seen running, idle is just the
            // worker not having caught up with `/start` yet.
            let ended = state.seen_active || state.frames_ended;
            (ended && report.reports_inactive()).then(|| report.stopped_verdict())
        });
        if report.reports_active() {
            state.seen_active = true;
        }

        match verdict {
            Some(verdict) => {
                drop(state);
                self.cancel_cadences();
                self.settle_with(verdict, None);
                Flow::Halt
            }
            None => Flow::Continue,
        }
    }

    /// Apply a status reply received while `Finalizing`. Returns true once
    /// the action is terminal.
    pub fn apply_final_status(&self, report: StatusReport) -> bool {
        let mut state = self.lock();
        if state.session.is_settled() {
            return true;
        }
        if self.merge_status(&mut state, &report) == Admission::Stale {
            return false;
        }
        drop(state);

        match report.verdict_after_stop() {
            Some(verdict) => self.settle_with(verdict, None),
            None => false,
        }
    }

    fn merge_status(&self, state: &mut ActionState, report: &StatusReport) -> Admission {
        let admission = state.session.admit(report.session_id.as_deref());
        if admission != Admission::Apply {
            if admission == Admission::Stale {
                debug!(worker = %self.kind, session_id = ?report.session_id, "discarding stale status");
            }
            return admission;
        }

        state.view.server_session_id = state.session.server_session_id().map(String::from);
        if state.view.phase != ActionPhase::Finalizing {
            state.view.status = report.status.clone();
        }
        if !report.message.is_empty() {
            state.view.message = report.message.clone();
        }
        state.view.progress = report.progress.max(state.view.progress);
        if let Some(recognized) = &report.recognized {
            state.view.recognized = recognized.clone();
        }
        if report.current_count.is_some() {
            state.view.current_count = report.current_count;
        }
        if report.max_count.is_some() {
            state.view.max_count = report.max_count;
        }
        state.touch();
        Admission::Apply
    }

    fn settle_with(&self, verdict: Verdict, failure: Option<FailureKind>) -> bool {
        let mut state = self.lock();
        self.settle_locked(&mut state, verdict, failure)
    }

    fn settle_locked(
        &self,
        state: &mut ActionState,
        verdict: Verdict,
        failure: Option<FailureKind>,
    ) -> bool {
        if !state.session.settle() {
            return true;
        }
        state.frame = None;
        state.view.status = verdict.phase.to_string();
        state.view.message = verdict.message.clone();
        if verdict.phase == ActionPhase::Completed {
            state.view.progress = 1.0;
        }
        state.view.result = Some(ActionResult {
            success: verdict.success,
            message: verdict.message,
            failure,
            log_tail: None,
        });
        self.set_phase(state, verdict.phase);
        info!(
            worker = %self.kind,
            session_id = %state.session.id,
            phase = %verdict.phase,
            success = verdict.success,
            "action finished"
        );
        true
    }

    /// Fail a polling action after its cadence lost the worker.
    ///
    /// No-op, returning false, when the cadences were already cancelled.
    pub fn lose_connection(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut state = self.lock();
        if !state.accepting() {
            return false;
        }
        state.cadences_cancelled = true;
        warn!(worker = %self.kind, error = %message, "connection lost to worker");
        self.settle_locked(
            &mut state,
            Verdict {
                phase: ActionPhase::Failed,
                success: false,
                message,
            },
            Some(FailureKind::TransportFailure),
        );
        drop(state);
        self.abort_tasks();
        true
    }

    /// End the action as `Failed` on the orchestrator side.
    pub fn fail(&self, failure: FailureKind, message: impl Into<String>) {
        self.fail_with_tail(failure, message, None);
    }

    /// End the action as `Failed`, attaching captured worker output.
    pub fn fail_with_tail(
        &self,
        failure: FailureKind,
        message: impl Into<String>,
        log_tail: Option<String>,
    ) {
        self.cancel_cadences();
        let message = message.into();
        warn!(worker = %self.kind, ?failure, error = %message, "action failed");
        self.settle_with(
            Verdict {
                phase: ActionPhase::Failed,
                success: false,
                message,
            },
            Some(failure),
        );
        if log_tail.is_some() {
            let mut state = self.lock();
            if let Some(result) = state.view.result.as_mut().filter(|r| r.failure == Some(failure)) {
                result.log_tail = log_tail;
            }
        }
    }

    /// Drop the action: cancel cadences, clear buffers and settle as
    /// `Stopped` so waiters are released. Late responses are discarded.
    pub fn abandon(&self) {
        self.cancel_cadences();
        let mut state = self.lock();
        state.frame = None;
        if state.session.settle() {
            state.view.status = "abandoned".to_string();
            state.view.message = "Action abandoned".to_string();
            self.set_phase(&mut state, ActionPhase::Stopped);
            debug!(worker = %self.kind, session_id = %state.session.id, "action abandoned");
        }
    }

    /// Wait until the action is terminal and return its snapshot.
    pub async fn wait_terminal(&self) -> ActionSnapshot {
        let mut rx = self.phase_tx.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(ActionPhase::is_terminal).await;
        self.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ActionPhase> {
        self.phase_tx.subscribe()
    }
}
