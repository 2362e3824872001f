//! Cluster-wide sequencing: preflight, control node, then workers one at a time.

use std::time::Duration;

use chrono::Local;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lifecycle::NodeLifecycle;
use super::plan::{NodeDescriptor, UpgradePlan};
use super::types::{AbortReason, NodeOutcome, NodeRole, NodeStatus, RunSummary};
use crate::error::{KruError, SoftCheckWarning};
use crate::k8s::kubectl;
use crate::output::spinner;
use crate::prompt::Prompter;
use crate::remote::RemoteExecutor;

/// Runs an [`UpgradePlan`] to completion and reports what happened.
pub struct ClusterUpgradeOrchestrator<'a> {
    executor: &'a RemoteExecutor,
    prompter: &'a dyn Prompter,
    cancel: CancellationToken,
}

impl<'a> ClusterUpgradeOrchestrator<'a> {
    pub fn new(
        executor: &'a RemoteExecutor,
        prompter: &'a dyn Prompter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            prompter,
            cancel,
        }
    }

    /// Execute the plan. Never fails: every outcome, including an abort, is
    /// folded into the returned summary.
    pub async fn run(&self, plan: &UpgradePlan) -> RunSummary {
        let started_at = Local::now();
        let mut summary = RunSummary {
            plan: plan.clone(),
            control: None,
            workers: Vec::with_capacity(plan.workers().len()),
            abort: None,
            cluster_health: None,
            started_at,
            finished_at: started_at,
        };

        info!(
            target_version = %plan.target(),
            workers = plan.workers().len(),
            dry_run = plan.mode().dry_run,
            "Starting rolling upgrade"
        );

        println!();
        println!("{}", "=== Preflight: connectivity ===".cyan().bold());
        if let Err(err) = self.preflight(plan).await {
            let abort = match err {
                KruError::Connectivity { host, detail } => AbortReason::Connectivity { host, detail },
                other => AbortReason::Connectivity {
                    host: plan.control().host.clone(),
                    detail: other.to_string(),
                },
            };
            warn!("{}", abort);
            return finish(summary, plan, abort, "preflight failed");
        }

        let lifecycle = NodeLifecycle::new(plan, self.executor, self.cancel.clone());
        let total = plan.workers().len() + usize::from(plan.upgrades_control_plane());

        if plan.upgrades_control_plane() {
            if self.cancel.is_cancelled() {
                return finish(summary, plan, AbortReason::Cancelled, "cancelled");
            }

            print_node_header(1, total, NodeRole::Control, plan.control());
            let outcome = lifecycle.execute(plan.control(), NodeRole::Control).await;
            let failed = outcome.status == NodeStatus::Failed;
            summary.control = Some(outcome);

            if failed {
                warn!("Control plane upgrade failed, workers will not be touched");
                return finish(
                    summary,
                    plan,
                    AbortReason::ControlPlaneFailed,
                    "control plane upgrade failed",
                );
            }

            if !plan.workers().is_empty() {
                self.pause(
                    plan.timing().control_plane_settle,
                    "Waiting for the control plane to settle",
                )
                .await;
            }
        }

        let offset = usize::from(plan.upgrades_control_plane());
        for (i, worker) in plan.workers().iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(node = %worker.name, "Run cancelled before node started");
                return finish(summary, plan, AbortReason::Cancelled, "cancelled");
            }

            print_node_header(offset + i + 1, total, NodeRole::Worker, worker);
            let outcome = lifecycle.execute(worker, NodeRole::Worker).await;
            let failed = outcome.status == NodeStatus::Failed;
            summary.workers.push(outcome);

            let remaining = plan.workers().len() - i - 1;
            if remaining == 0 {
                break;
            }

            if self.cancel.is_cancelled() {
                info!(node = %worker.name, "Run cancelled, not asking to continue");
                return finish(summary, plan, AbortReason::Cancelled, "cancelled");
            }

            if failed {
                if !self.should_continue(plan, worker, remaining) {
                    let abort = AbortReason::UserDeclined {
                        after: worker.name.clone(),
                    };
                    return finish(summary, plan, abort, "operator declined to continue");
                }
            } else {
                self.pause(plan.timing().node_pause, "Pausing before the next node")
                    .await;
            }
        }

        if !plan.mode().skip_verification {
            summary.cluster_health = Some(self.cluster_health(plan).await);
        }

        summary.finished_at = Local::now();
        info!(
            succeeded = summary.totals().succeeded,
            failed = summary.totals().failed,
            "Rolling upgrade finished"
        );
        summary
    }

    /// Every host must answer before anything is changed.
    async fn preflight(&self, plan: &UpgradePlan) -> Result<(), KruError> {
        for host in plan.hosts() {
            self.executor.check_connectivity(host).await?;
            println!("  {} {}", "✓".green(), host);
        }
        Ok(())
    }

    /// Continuation policy after a failed worker.
    fn should_continue(&self, plan: &UpgradePlan, failed: &NodeDescriptor, remaining: usize) -> bool {
        if plan.mode().auto_approve {
            info!(node = %failed.name, remaining, "Worker failed, continuing (auto-approve)");
            return true;
        }

        let answer = self.prompter.confirm_continue(failed, remaining);
        info!(node = %failed.name, remaining, answer, "Continuation prompt answered");
        answer
    }

    /// Bounded wait that returns early on cancellation. No-op in dry-run.
    async fn pause(&self, duration: Duration, message: &str) {
        if self.executor.is_dry_run() || duration.is_zero() {
            debug!(?duration, "Skipping pause");
            return;
        }

        let pb = spinner(format!("{} ({}s)", message, duration.as_secs()));
        tokio::select! {
            _ = self.cancel.cancelled() => debug!("Pause interrupted by cancellation"),
            _ = tokio::time::sleep(duration) => {}
        }
        pb.finish_and_clear();
    }

    async fn cluster_health(&self, plan: &UpgradePlan) -> Result<String, SoftCheckWarning> {
        println!();
        println!("{}", "=== Post-run verification ===".cyan().bold());
        self.executor
            .run_soft(&plan.control().host, &kubectl::cluster_health())
            .await
            .map(|outcome| outcome.output().to_string())
    }
}

/// Record the abort and mark every node that has no outcome yet as skipped.
fn finish(mut summary: RunSummary, plan: &UpgradePlan, abort: AbortReason, reason: &str) -> RunSummary {
    if plan.upgrades_control_plane() && summary.control.is_none() {
        summary.control = Some(NodeOutcome::skipped(plan.control(), NodeRole::Control, reason));
    }
    for worker in plan.workers().iter().skip(summary.workers.len()) {
        summary
            .workers
            .push(NodeOutcome::skipped(worker, NodeRole::Worker, reason));
    }

    summary.abort = Some(abort);
    summary.finished_at = Local::now();
    summary
}

fn print_node_header(index: usize, total: usize, role: NodeRole, node: &NodeDescriptor) {
    println!();
    println!(
        "{}",
        format!("[{}/{}] {} {}", index, total, role, node)
            .cyan()
            .bold()
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::prompt::AutoApprove;
    use crate::prompt::testing::ScriptedPrompter;
    use crate::remote::testing::ScriptedTransport;
    use crate::upgrade::plan::{RunMode, Timing};
    use crate::upgrade::types::{Phase, Totals};

    fn timing() -> Timing {
        Timing {
            node_pause: Duration::from_millis(1),
            control_plane_settle: Duration::from_millis(1),
            ready_interval: Duration::from_millis(1),
            ready_timeout: Duration::from_millis(3),
            ..Default::default()
        }
    }

    fn plan(workers: &[&str], mode: RunMode) -> UpgradePlan {
        plan_with(workers, mode, timing())
    }

    fn plan_with(workers: &[&str], mode: RunMode, timing: Timing) -> UpgradePlan {
        let workers = workers
            .iter()
            .enumerate()
            .map(|(i, n)| NodeDescriptor::new(*n, format!("10.0.0.{}", 11 + i)))
            .collect();
        UpgradePlan::new(
            "1.33.1-1.1",
            NodeDescriptor::new("cp1", "10.0.0.10"),
            workers,
            mode,
            timing,
        )
        .unwrap()
    }

    fn cancel_after(cancel: &CancellationToken, delay: Duration) {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    const HOUR: Duration = Duration::from_secs(3600);

    fn auto() -> RunMode {
        RunMode {
            auto_approve: true,
            ..Default::default()
        }
    }

    async fn run_with(
        transport: Arc<ScriptedTransport>,
        plan: &UpgradePlan,
        prompter: &dyn Prompter,
        cancel: CancellationToken,
    ) -> RunSummary {
        let exec = RemoteExecutor::new(transport, plan.mode().dry_run, Duration::from_secs(5));
        ClusterUpgradeOrchestrator::new(&exec, prompter, cancel)
            .run(plan)
            .await
    }

    async fn run(transport: Arc<ScriptedTransport>, plan: &UpgradePlan) -> RunSummary {
        run_with(transport, plan, &AutoApprove, CancellationToken::new()).await
    }

    fn names(summary: &RunSummary) -> Vec<&str> {
        summary.outcomes().map(|o| o.node.name.as_str()).collect()
    }

    fn statuses(summary: &RunSummary) -> Vec<NodeStatus> {
        summary.workers.iter().map(|o| o.status).collect()
    }

    #[tokio::test]
    async fn test_full_run_preserves_plan_order() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan(&["w1", "w2", "w3"], auto());

        let summary = run(transport, &plan).await;

        assert_eq!(names(&summary), vec!["cp1", "w1", "w2", "w3"]);
        assert!(summary.outcomes().all(|o| o.status == NodeStatus::Succeeded));
        assert!(summary.abort.is_none());
        assert!(matches!(summary.cluster_health, Some(Ok(_))));
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_outcome_count_matches_plan() {
        let cases = [
            (vec![], RunMode::default(), 1),
            (vec!["w1"], RunMode::default(), 2),
            (
                vec!["w1", "w2"],
                RunMode {
                    workers_only: true,
                    ..Default::default()
                },
                2,
            ),
        ];

        for (workers, mode, expected) in cases {
            let transport = Arc::new(ScriptedTransport::healthy());
            let plan = plan(&workers, mode);
            let summary = run(transport, &plan).await;
            assert_eq!(summary.outcomes().count(), expected);
        }
    }

    #[tokio::test]
    async fn test_nodes_run_strictly_one_after_another() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan(&["w1", "w2"], auto());

        run(transport.clone(), &plan).await;

        // w2 is not drained until w1 has been uncordoned.
        let calls = transport.calls();
        let position = |needle: &str| calls.iter().position(|(_, c)| c.contains(needle)).unwrap();
        assert!(position("kubeadm upgrade apply") < position("drain w1"));
        assert!(position("uncordon w1") < position("drain w2"));
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_remote_commands() {
        let transport = Arc::new(ScriptedTransport::default());
        for host in ["10.0.0.10", "10.0.0.11", "10.0.0.12"] {
            transport.unreachable(host);
        }
        let mode = RunMode {
            dry_run: true,
            ..Default::default()
        };
        let plan = plan(&["w1", "w2"], mode);

        let summary = run(transport.clone(), &plan).await;

        assert!(transport.calls().is_empty());
        assert!(summary.outcomes().all(|o| o.status == NodeStatus::Succeeded));
        assert!(summary.workers.iter().all(|o| o.phases() == Phase::ALL.to_vec()));
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_worker_package_failure_scenario() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(Some("10.0.0.11"), "kubeadm upgrade node");
        let plan = plan(&["w1", "w2"], auto());

        let summary = run(transport, &plan).await;

        assert_eq!(
            summary.totals(),
            Totals {
                attempted: 2,
                succeeded: 1,
                failed: 1,
                skipped: 0
            }
        );
        let w1 = &summary.workers[0];
        assert_eq!(w1.status, NodeStatus::Failed);
        assert!(w1.step(Phase::Uncordon).is_some());

        let w2 = &summary.workers[1];
        assert_eq!(w2.status, NodeStatus::Succeeded);
        assert_eq!(w2.phases(), Phase::ALL.to_vec());

        assert!(summary.abort.is_none());
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_auto_approve_attempts_every_worker() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "drain w1");
        let plan = plan(&["w1", "w2", "w3"], auto());
        let prompter = ScriptedPrompter::answering(&[]);

        let summary = run_with(transport, &plan, &prompter, CancellationToken::new()).await;

        assert_eq!(
            statuses(&summary),
            vec![NodeStatus::Failed, NodeStatus::Succeeded, NodeStatus::Succeeded]
        );
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_interactive_decline_skips_remaining_workers() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "drain w1");
        let plan = plan(&["w1", "w2", "w3"], RunMode::default());
        let prompter = ScriptedPrompter::answering(&[false]);

        let summary = run_with(transport.clone(), &plan, &prompter, CancellationToken::new()).await;

        assert_eq!(
            statuses(&summary),
            vec![NodeStatus::Failed, NodeStatus::Skipped, NodeStatus::Skipped]
        );
        assert_eq!(prompter.asked(), vec![("w1".to_string(), 2)]);
        assert_eq!(
            summary.abort,
            Some(AbortReason::UserDeclined {
                after: "w1".to_string()
            })
        );
        assert_eq!(transport.count_matching("drain w2"), 0);
        assert!(summary.cluster_health.is_none());
        assert_eq!(summary.totals().skipped, 2);
    }

    #[tokio::test]
    async fn test_interactive_accept_continues() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "drain w1");
        let plan = plan(&["w1", "w2"], RunMode::default());
        let prompter = ScriptedPrompter::answering(&[true]);

        let summary = run_with(transport, &plan, &prompter, CancellationToken::new()).await;

        assert_eq!(
            statuses(&summary),
            vec![NodeStatus::Failed, NodeStatus::Succeeded]
        );
        assert!(summary.abort.is_none());
    }

    #[tokio::test]
    async fn test_last_worker_failure_does_not_prompt() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "drain w2");
        let plan = plan(&["w1", "w2"], RunMode::default());
        let prompter = ScriptedPrompter::answering(&[]);

        let summary = run_with(transport, &plan, &prompter, CancellationToken::new()).await;

        assert!(prompter.asked().is_empty());
        assert!(summary.abort.is_none());
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_aborts_before_any_change() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.unreachable("10.0.0.12");
        let plan = plan(&["w1", "w2"], auto());

        let summary = run(transport.clone(), &plan).await;

        assert!(transport.calls().iter().all(|(_, cmd)| cmd == "true"));
        assert!(summary.outcomes().all(|o| o.status == NodeStatus::Skipped));
        assert_eq!(summary.outcomes().count(), 3);
        assert!(matches!(
            summary.abort,
            Some(AbortReason::Connectivity { ref host, .. }) if host == "10.0.0.12"
        ));
        assert_eq!(summary.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_control_plane_failure_leaves_workers_untouched() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "kubeadm upgrade apply");
        let plan = plan(&["w1", "w2"], auto());

        let summary = run(transport.clone(), &plan).await;

        assert_eq!(
            summary.control.as_ref().map(|o| o.status),
            Some(NodeStatus::Failed)
        );
        assert_eq!(statuses(&summary), vec![NodeStatus::Skipped; 2]);
        assert_eq!(summary.abort, Some(AbortReason::ControlPlaneFailed));
        assert_eq!(transport.count_matching("drain"), 0);
        assert!(
            transport
                .calls()
                .iter()
                .filter(|(h, _)| h != "10.0.0.10")
                .all(|(_, cmd)| cmd == "true")
        );
    }

    #[tokio::test]
    async fn test_workers_only_leaves_control_node_alone() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let mode = RunMode {
            workers_only: true,
            ..auto()
        };
        let plan = plan(&["w1"], mode);

        let summary = run(transport.clone(), &plan).await;

        assert!(summary.control.is_none());
        assert_eq!(statuses(&summary), vec![NodeStatus::Succeeded]);
        assert_eq!(transport.count_matching("kubeadm upgrade apply"), 0);
        // The control node still serves kubectl.
        assert!(
            transport
                .calls()
                .iter()
                .any(|(h, c)| h == "10.0.0.10" && c.contains("drain w1"))
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan(&["w1"], auto());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = run_with(transport.clone(), &plan, &AutoApprove, cancel).await;

        assert_eq!(summary.abort, Some(AbortReason::Cancelled));
        assert!(summary.outcomes().all(|o| o.status == NodeStatus::Skipped));
        assert_eq!(transport.count_matching("apt-get"), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_current_node_only() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "drain w1");
        let plan = plan(&["w1", "w2", "w3"], RunMode::default());
        let cancel = CancellationToken::new();
        let prompter = ScriptedPrompter::cancelling(cancel.clone());

        let summary = run_with(transport.clone(), &plan, &prompter, cancel).await;

        assert_eq!(
            statuses(&summary),
            vec![NodeStatus::Failed, NodeStatus::Skipped, NodeStatus::Skipped]
        );
        assert_eq!(summary.workers[1].skip_reason.as_deref(), Some("cancelled"));
        assert_eq!(summary.abort, Some(AbortReason::Cancelled));
        assert_eq!(transport.count_matching("drain w2"), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_readiness_wait_does_not_prompt() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.respond(None, "get node w1", "False");
        let mode = RunMode {
            workers_only: true,
            ..Default::default()
        };
        let plan = plan_with(
            &["w1", "w2"],
            mode,
            Timing {
                ready_interval: Duration::from_millis(10),
                ready_timeout: Duration::from_secs(60),
                ..timing()
            },
        );
        let cancel = CancellationToken::new();
        let prompter = ScriptedPrompter::answering(&[false]);
        cancel_after(&cancel, Duration::from_millis(100));

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_with(transport.clone(), &plan, &prompter, cancel),
        )
        .await
        .unwrap();

        assert!(prompter.asked().is_empty());
        assert_eq!(summary.abort, Some(AbortReason::Cancelled));
        assert_eq!(
            statuses(&summary),
            vec![NodeStatus::Failed, NodeStatus::Skipped]
        );
        let w1 = &summary.workers[0];
        assert!(w1.step(Phase::Uncordon).is_some_and(|s| s.compensation));
        assert_eq!(summary.workers[1].skip_reason.as_deref(), Some("cancelled"));
        assert_eq!(transport.count_matching("drain w2"), 0);
    }

    #[tokio::test]
    async fn test_single_worker_never_pauses() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan_with(
            &["w1"],
            auto(),
            Timing {
                node_pause: HOUR,
                ..timing()
            },
        );

        let summary = tokio::time::timeout(Duration::from_secs(1), run(transport, &plan))
            .await
            .unwrap();

        assert_eq!(statuses(&summary), vec![NodeStatus::Succeeded]);
        assert!(summary.abort.is_none());
    }

    #[tokio::test]
    async fn test_control_only_skips_settle_pause() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan_with(
            &[],
            auto(),
            Timing {
                control_plane_settle: HOUR,
                node_pause: HOUR,
                ..timing()
            },
        );

        let summary = tokio::time::timeout(Duration::from_secs(1), run(transport, &plan))
            .await
            .unwrap();

        assert_eq!(
            summary.control.as_ref().map(|o| o.status),
            Some(NodeStatus::Succeeded)
        );
        assert_eq!(summary.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_cancel_cuts_node_pause_short() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan_with(
            &["w1", "w2"],
            auto(),
            Timing {
                node_pause: HOUR,
                ..timing()
            },
        );
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(100));

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_with(transport.clone(), &plan, &AutoApprove, cancel),
        )
        .await
        .unwrap();

        assert_eq!(
            statuses(&summary),
            vec![NodeStatus::Succeeded, NodeStatus::Skipped]
        );
        assert_eq!(summary.abort, Some(AbortReason::Cancelled));
        assert_eq!(transport.count_matching("drain w2"), 0);
    }

    #[tokio::test]
    async fn test_cancel_cuts_control_plane_settle_short() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let plan = plan_with(
            &["w1"],
            auto(),
            Timing {
                control_plane_settle: HOUR,
                ..timing()
            },
        );
        let cancel = CancellationToken::new();
        cancel_after(&cancel, Duration::from_millis(100));

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run_with(transport.clone(), &plan, &AutoApprove, cancel),
        )
        .await
        .unwrap();

        assert_eq!(
            summary.control.as_ref().map(|o| o.status),
            Some(NodeStatus::Succeeded)
        );
        assert_eq!(statuses(&summary), vec![NodeStatus::Skipped]);
        assert_eq!(summary.abort, Some(AbortReason::Cancelled));
        assert_eq!(transport.count_matching("drain w1"), 0);
    }

    #[tokio::test]
    async fn test_skip_verification_skips_cluster_health() {
        let transport = Arc::new(ScriptedTransport::healthy());
        let mode = RunMode {
            skip_verification: true,
            ..auto()
        };
        let plan = plan(&["w1"], mode);

        let summary = run(transport.clone(), &plan).await;

        assert!(summary.cluster_health.is_none());
        assert_eq!(transport.count_matching("get nodes -o wide"), 0);
    }

    #[tokio::test]
    async fn test_cluster_health_failure_is_only_a_warning() {
        let transport = Arc::new(ScriptedTransport::healthy());
        transport.fail_on(None, "get nodes -o wide");
        let plan = plan(&["w1"], auto());

        let summary = run(transport, &plan).await;

        assert!(matches!(summary.cluster_health, Some(Err(_))));
        assert_eq!(summary.exit_code(), 0);
    }
}
