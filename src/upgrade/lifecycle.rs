//! Per-node upgrade lifecycle.
//!
//! Workers: drain -> package-upgrade -> wait-ready -> uncordon -> verify.
//! Control node: package-upgrade -> wait-ready -> verify.
//!
//! Once drain has succeeded, every path to a terminal state passes through
//! uncordon. When an intermediate phase fails the uncordon is recorded as a
//! compensation step and the node still ends `Failed`.

use std::time::Instant;

use chrono::Local;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::plan::{NodeDescriptor, UpgradePlan};
use super::poller::ReadinessPoller;
use super::types::{NodeOutcome, NodeRole, NodeStatus, Phase, StepResult, format_duration};
use crate::error::KruError;
use crate::k8s::kubectl;
use crate::packages;
use crate::remote::RemoteExecutor;

/// Position in the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Run(Phase),
    /// Uncordon issued because a phase after drain failed.
    Compensate,
    Done(NodeStatus),
}

/// Facts about the node that steer transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub drained: bool,
    pub verify: bool,
}

/// First state for a node.
pub fn initial_state(role: NodeRole, skip_drain: bool) -> State {
    match role {
        NodeRole::Worker if !skip_drain => State::Run(Phase::Drain),
        _ => State::Run(Phase::PackageUpgrade),
    }
}

/// Transition function of the lifecycle.
pub fn next_state(state: State, succeeded: bool, ctx: Context) -> State {
    let verify_or_done = if ctx.verify {
        State::Run(Phase::Verify)
    } else {
        State::Done(NodeStatus::Succeeded)
    };

    match state {
        State::Run(Phase::Drain) if succeeded => State::Run(Phase::PackageUpgrade),
        State::Run(Phase::Drain) => State::Done(NodeStatus::Failed),

        State::Run(Phase::PackageUpgrade) if succeeded => State::Run(Phase::WaitReady),
        State::Run(Phase::WaitReady) if succeeded && ctx.drained => State::Run(Phase::Uncordon),
        State::Run(Phase::WaitReady) if succeeded => verify_or_done,
        State::Run(Phase::PackageUpgrade | Phase::WaitReady) if ctx.drained => State::Compensate,
        State::Run(Phase::PackageUpgrade | Phase::WaitReady) => State::Done(NodeStatus::Failed),

        // An uncordon failure is a warning, not a node failure.
        State::Run(Phase::Uncordon) => verify_or_done,
        State::Run(Phase::Verify) => State::Done(NodeStatus::Succeeded),

        State::Compensate => State::Done(NodeStatus::Failed),
        State::Done(status) => State::Done(status),
    }
}

/// Drives one node through its lifecycle.
pub struct NodeLifecycle<'a> {
    plan: &'a UpgradePlan,
    executor: &'a RemoteExecutor,
    poller: ReadinessPoller<'a>,
}

impl<'a> NodeLifecycle<'a> {
    pub fn new(
        plan: &'a UpgradePlan,
        executor: &'a RemoteExecutor,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plan,
            executor,
            poller: ReadinessPoller::new(executor, cancel),
        }
    }

    /// Run the full lifecycle and return the finalized outcome.
    pub async fn execute(&self, node: &NodeDescriptor, role: NodeRole) -> NodeOutcome {
        let mode = self.plan.mode();
        let mut ctx = Context {
            drained: false,
            verify: !mode.skip_verification,
        };
        let mut steps = Vec::new();
        let mut state = initial_state(role, mode.skip_drain);

        let status = loop {
            let step = match state {
                State::Done(status) => break status,
                State::Run(Phase::Drain) => self.drain(node).await,
                State::Run(Phase::PackageUpgrade) => self.package_upgrade(node, role).await,
                State::Run(Phase::WaitReady) => self.wait_ready(node).await,
                State::Run(Phase::Uncordon) => self.uncordon(node).await,
                State::Run(Phase::Verify) => self.verify(node, role).await,
                State::Compensate => self.uncordon(node).await.as_compensation(),
            };

            print_step(&step);
            if state == State::Run(Phase::Drain) && step.succeeded {
                ctx.drained = true;
            }
            state = next_state(state, step.succeeded, ctx);
            steps.push(step);
        };

        match status {
            NodeStatus::Succeeded => info!(node = %node.name, role = %role, "Node upgrade succeeded"),
            _ => warn!(node = %node.name, role = %role, "Node upgrade failed"),
        }

        NodeOutcome {
            node: node.clone(),
            role,
            steps,
            status,
            skip_reason: None,
        }
    }

    async fn drain(&self, node: &NodeDescriptor) -> StepResult {
        let start = Instant::now();
        let cmd = kubectl::drain(&node.name, self.plan.timing().drain_timeout);
        info!(node = %node.name, "Draining node");

        let outcome = self.executor.run(&self.plan.control().host, &cmd).await;
        match outcome.error_detail() {
            None => StepResult::success(Phase::Drain, start.elapsed()),
            Some(detail) => {
                let err = KruError::Phase {
                    node: node.name.clone(),
                    phase: Phase::Drain.to_string(),
                    detail,
                };
                warn!("{}", err);
                StepResult::failure(Phase::Drain, err.to_string(), start.elapsed())
            }
        }
    }

    async fn package_upgrade(&self, node: &NodeDescriptor, role: NodeRole) -> StepResult {
        let start = Instant::now();
        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let target = self.plan.target();

        for step in packages::upgrade_sequence(role, target, &timestamp) {
            info!(node = %node.name, step = step.label, "Package upgrade step");
            let outcome = self.executor.run(&node.host, &step.command).await;

            if let Some(detail) = outcome.error_detail() {
                let err = KruError::Phase {
                    node: node.name.clone(),
                    phase: Phase::PackageUpgrade.to_string(),
                    detail: format!("{}: {}", step.label, detail),
                };
                warn!("{}", err);
                return StepResult::failure(Phase::PackageUpgrade, err.to_string(), start.elapsed());
            }
        }

        StepResult::success(Phase::PackageUpgrade, start.elapsed())
    }

    async fn wait_ready(&self, node: &NodeDescriptor) -> StepResult {
        let timing = self.plan.timing();
        let readiness = self
            .poller
            .wait_until_ready(
                &self.plan.control().host,
                &node.name,
                timing.ready_interval,
                timing.ready_timeout,
            )
            .await;

        if readiness.ready {
            return StepResult::success(Phase::WaitReady, readiness.waited);
        }

        let detail = if readiness.cancelled {
            format!(
                "readiness wait cancelled after {} queries",
                readiness.attempts
            )
        } else {
            KruError::Timeout {
                operation: format!("node {} readiness", node.name),
                details: format!(
                    "not Ready after {} ({} queries)",
                    format_duration(timing.ready_timeout),
                    readiness.attempts
                ),
            }
            .to_string()
        };
        warn!(node = %node.name, "{}", detail);
        StepResult::failure(Phase::WaitReady, detail, readiness.waited)
    }

    async fn uncordon(&self, node: &NodeDescriptor) -> StepResult {
        let start = Instant::now();
        let cmd = kubectl::uncordon(&node.name);
        info!(node = %node.name, "Uncordoning node");

        let outcome = self.executor.run(&self.plan.control().host, &cmd).await;
        match outcome.error_detail() {
            None => StepResult::success(Phase::Uncordon, start.elapsed()),
            Some(detail) => {
                warn!(
                    node = %node.name,
                    "Uncordon failed, node may remain unschedulable and needs manual follow-up: {}",
                    detail
                );
                StepResult::failure(Phase::Uncordon, detail, start.elapsed())
            }
        }
    }

    async fn verify(&self, node: &NodeDescriptor, role: NodeRole) -> StepResult {
        let start = Instant::now();
        let mut warnings = Vec::new();
        let mut versions = Vec::new();

        for cmd in packages::version_checks() {
            match self.executor.run_soft(&node.host, &cmd).await {
                Ok(outcome) => {
                    if let Some(line) = outcome.output().lines().next() {
                        versions.push(line.trim().to_string());
                    }
                }
                Err(warning) => warnings.push(warning),
            }
        }

        if role == NodeRole::Control
            && let Err(warning) = self
                .executor
                .run_soft(&node.host, &kubectl::system_pods())
                .await
        {
            warnings.push(warning);
        }

        let mut step = if warnings.is_empty() {
            StepResult::success(Phase::Verify, start.elapsed())
        } else {
            StepResult::failure(
                Phase::Verify,
                format!("{} diagnostic check(s) failed", warnings.len()),
                start.elapsed(),
            )
        };
        if step.detail.is_none() && !versions.is_empty() {
            step.detail = Some(versions.join("; "));
        }
        step.with_warnings(warnings)
    }
}

/// One progress line per finished phase.
fn print_step(step: &StepResult) {
    let icon = match (step.succeeded, step.phase) {
        (true, _) => "✓".green(),
        (false, Phase::Verify | Phase::Uncordon) => "⚠".yellow(),
        (false, _) => "✗".red(),
    };
    let label = if step.compensation {
        format!("{} (cleanup)", step.phase)
    } else {
        step.phase.to_string()
    };

    println!(
        "    {} {:<22} {}",
        icon,
        label,
        format_duration(step.elapsed).dimmed()
    );
    if let Some(ref detail) = step.detail
        && !step.succeeded
    {
        println!("      {}", detail.dimmed());
    }
}
