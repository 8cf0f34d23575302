//! Readiness polling with a hard attempt ceiling.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::probe::{ProbeClient, ProbeRequest};
use crate::types::WorkerDescriptor;

/// Polls a worker's `/health` until it answers 2xx or the budget runs out.
///
/// Holds no state between calls; worst-case latency is
/// `max_attempts * (probe_timeout + spacing)`.
#[derive(Debug, Clone)]
pub struct ReadinessWaiter {
    client: ProbeClient,
    probe_timeout: Duration,
}

impl ReadinessWaiter {
    pub fn new(client: ProbeClient, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
        }
    }

    /// Returns true on the first healthy probe, false after `max_attempts`
    /// failed probes. Sleeps `spacing` between attempts, never after the last.
    pub async fn wait_until_healthy(
        &self,
        descriptor: &WorkerDescriptor,
        max_attempts: u32,
        spacing: Duration,
    ) -> bool {
        for attempt in 1..=max_attempts {
            let result = self
                .client
                .probe(
                    &descriptor.base_url,
                    "/health",
                    ProbeRequest::get(self.probe_timeout),
                )
                .await;

            if result.ok {
                info!(worker = %descriptor.kind, attempt, "worker is healthy");
                return true;
            }

            debug!(
                worker = %descriptor.kind,
                attempt,
                max_attempts,
                status = result.status_code,
                "worker not ready yet"
            );

            if attempt < max_attempts {
                tokio::time::sleep(spacing).await;
            }
        }

        warn!(worker = %descriptor.kind, max_attempts, "worker never became healthy");
        false
    }
}
