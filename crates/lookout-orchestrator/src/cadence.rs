//! Periodic frame and status polling for one action, and finalization.
//!
//! Both cadences are plain tokio tasks owned by their [`ActionScope`]. They
//! never mutate caller-visible state directly; every reply goes through the
//! scope, which drops it once the cadences are cancelled.

use lookout_core::config::PollingConfig;
use lookout_worker::{ProbeResult, WorkerLifecycleManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::action::{ActionScope, ActionSnapshot, FailureKind, Flow};
use crate::payload::{FrameReport, StatusReport};

/// Spacing of `/status` polls while waiting for a stop to be acknowledged.
const FINALIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Counts consecutive failed polls and decides when to give up.
#[derive(Debug)]
struct FailureTracker<'a> {
    polling: &'a PollingConfig,
    consecutive: u32,
}

impl<'a> FailureTracker<'a> {
    fn new(polling: &'a PollingConfig) -> Self {
        Self {
            polling,
            consecutive: 0,
        }
    }

    fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Record a failure. Returns the delay before the next attempt, or
    /// `None` once the failure budget is spent.
    fn failure(&mut self, interval: Duration) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= self.polling.max_consecutive_failures {
            return None;
        }
        Some(
            self.polling
                .backoff
                .delay_for_failures(self.consecutive)
                .max(interval),
        )
    }
}

fn connection_lost(result: &ProbeResult) -> String {
    format!("Connection lost to worker: {}", result.message())
}

/// Fast cadence: keep the frame buffer fresh until the worker goes inactive.
pub(crate) async fn frame_cadence(
    scope: Arc<ActionScope>,
    manager: Arc<WorkerLifecycleManager>,
    polling: PollingConfig,
) {
    let interval = polling.frame_interval();
    let mut failures = FailureTracker::new(&polling);

    loop {
        let result = manager.fetch_frame().await;
        let delay = if result.ok {
            failures.success();
            if scope.apply_frame(FrameReport::parse(&result.payload)) == Flow::Halt {
                debug!(worker = %scope.kind(), "frame cadence finished");
                return;
            }
            interval
        } else {
            match failures.failure(interval) {
                Some(delay) => delay,
                None => {
                    scope.lose_connection(connection_lost(&result));
                    return;
                }
            }
        };
        tokio::time::sleep(delay).await;
    }
}

/// Slow cadence: merge status replies until the worker reports a terminal
/// result, or until the auto-finalize deadline passes.
pub(crate) async fn status_cadence(
    scope: Arc<ActionScope>,
    manager: Arc<WorkerLifecycleManager>,
    polling: PollingConfig,
    interval: Duration,
    auto_finalize_after: Option<Duration>,
) {
    let deadline = auto_finalize_after.map(|after| Instant::now() + after);
    let mut failures = FailureTracker::new(&polling);

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!(worker = %scope.kind(), "auto-finalize deadline reached");
            // Finalizing aborts this task, so it runs on its own.
            tokio::spawn(finalize(scope.clone(), manager.clone(), polling.clone()));
            return;
        }

        let result = manager.fetch_status().await;
        let delay = if result.ok {
            failures.success();
            if scope.apply_status(StatusReport::parse(&result.payload)) == Flow::Halt {
                debug!(worker = %scope.kind(), "status cadence finished");
                return;
            }
            interval
        } else {
            match failures.failure(interval) {
                Some(delay) => delay,
                None => {
                    scope.lose_connection(connection_lost(&result));
                    return;
                }
            }
        };

        let wake = Instant::now() + delay;
        let wake = deadline.map_or(wake, |d| wake.min(d));
        tokio::time::sleep_until(wake).await;
    }
}

/// Move an action to `Finalizing`, ask the worker to stop, and wait within
/// the finalize budget for its terminal acknowledgement.
///
/// Cadences are cancelled before `/stop` is issued. If the worker never
/// acknowledges, the action fails with [`FailureKind::FinalizeTimeout`].
/// Concurrent calls for the same action wait for the first one.
pub async fn finalize(
    scope: Arc<ActionScope>,
    manager: Arc<WorkerLifecycleManager>,
    polling: PollingConfig,
) -> ActionSnapshot {
    if !scope.begin_finalizing() {
        return scope.wait_terminal().await;
    }

    let report = manager.stop().await;
    debug!(
        worker = %scope.kind(),
        acknowledged = report.acknowledged,
        message = %report.message,
        "stop issued, waiting for final status"
    );

    let budget = polling.finalize_timeout();
    let deadline = Instant::now() + budget;
    loop {
        let result = manager.fetch_status().await;
        if result.ok && scope.apply_final_status(StatusReport::parse(&result.payload)) {
            break;
        }
        if scope.is_settled() {
            break;
        }

        let now = Instant::now();
        if now >= deadline {
            scope.fail(
                FailureKind::FinalizeTimeout,
                format!(
                    "Worker did not confirm the stop within {}s",
                    budget.as_secs_f32()
                ),
            );
            break;
        }
        tokio::time::sleep(FINALIZE_POLL_INTERVAL.min(deadline - now)).await;
    }

    scope.snapshot()
}
