//! Bounded, cancellable node readiness polling.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::k8s::kubectl;
use crate::output::spinner;
use crate::remote::RemoteExecutor;

/// Result of a readiness wait. A timeout is not an error; the caller decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub waited: Duration,
    pub attempts: u32,
    pub cancelled: bool,
}

/// Number of status queries that fit in `timeout` at `interval` spacing.
pub fn max_attempts(timeout: Duration, interval: Duration) -> u32 {
    let interval = interval.as_nanos().max(1);
    let attempts = timeout.as_nanos().div_ceil(interval).max(1);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

/// Asks the control node whether a node is Ready until it is or time runs out.
pub struct ReadinessPoller<'a> {
    executor: &'a RemoteExecutor,
    cancel: CancellationToken,
}

impl<'a> ReadinessPoller<'a> {
    pub fn new(executor: &'a RemoteExecutor, cancel: CancellationToken) -> Self {
        Self { executor, cancel }
    }

    /// Poll every `interval`, giving up after `ceil(timeout / interval)`
    /// queries. Cancellation is honored between queries, never during one.
    pub async fn wait_until_ready(
        &self,
        control_host: &str,
        node_name: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Readiness {
        if self.executor.is_dry_run() {
            debug!(node = %node_name, "[DRY RUN] assuming node is Ready");
            return Readiness {
                ready: true,
                waited: Duration::ZERO,
                attempts: 0,
                cancelled: false,
            };
        }

        let max = max_attempts(timeout, interval);
        let start = Instant::now();
        let query = kubectl::node_ready(node_name);
        let pb = spinner(format!("Waiting for {} to become Ready", node_name));

        for attempt in 1..=max {
            if self.cancel.is_cancelled() {
                pb.finish_and_clear();
                info!(node = %node_name, attempt, "Readiness wait cancelled");
                return Readiness {
                    ready: false,
                    waited: start.elapsed(),
                    attempts: attempt - 1,
                    cancelled: true,
                };
            }

            let outcome = self.executor.run(control_host, &query).await;
            let ready = outcome.succeeded && kubectl::parse_ready_status(outcome.output());

            pb.set_message(format!(
                "Waiting for {} to become Ready ({}/{})",
                node_name, attempt, max
            ));
            debug!(node = %node_name, attempt, max, ready, "Readiness query");

            if ready {
                pb.finish_and_clear();
                return Readiness {
                    ready: true,
                    waited: start.elapsed(),
                    attempts: attempt,
                    cancelled: false,
                };
            }

            if attempt < max {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        pb.finish_and_clear();
        Readiness {
            ready: false,
            waited: start.elapsed(),
            attempts: max,
            cancelled: false,
        }
    }
}
