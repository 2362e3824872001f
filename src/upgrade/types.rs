//! Per-phase, per-node and per-run results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use super::plan::{NodeDescriptor, UpgradePlan};
use crate::error::SoftCheckWarning;

/// Lifecycle phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Drain,
    PackageUpgrade,
    WaitReady,
    Uncordon,
    Verify,
}

impl Phase {
    #[cfg(test)]
    pub const ALL: [Phase; 5] = [
        Phase::Drain,
        Phase::PackageUpgrade,
        Phase::WaitReady,
        Phase::Uncordon,
        Phase::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Drain => "drain",
            Phase::PackageUpgrade => "package-upgrade",
            Phase::WaitReady => "wait-ready",
            Phase::Uncordon => "uncordon",
            Phase::Verify => "verify",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which upgrade sequence a node goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Control,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Control => f.write_str("control"),
            NodeRole::Worker => f.write_str("worker"),
        }
    }
}

/// Outcome of one phase on one node. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub phase: Phase,
    pub succeeded: bool,
    pub detail: Option<String>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Non-fatal diagnostics collected during the phase.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<SoftCheckWarning>,
    /// Uncordon issued as cleanup after a later phase failed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub compensation: bool,
}

impl StepResult {
    pub fn success(phase: Phase, elapsed: Duration) -> Self {
        Self {
            phase,
            succeeded: true,
            detail: None,
            elapsed,
            warnings: Vec::new(),
            compensation: false,
        }
    }

    pub fn failure(phase: Phase, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            phase,
            succeeded: false,
            detail: Some(detail.into()),
            elapsed,
            warnings: Vec::new(),
            compensation: false,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<SoftCheckWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn as_compensation(mut self) -> Self {
        self.compensation = true;
        self
    }
}

/// Terminal status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Succeeded => f.write_str("Succeeded"),
            NodeStatus::Failed => f.write_str("Failed"),
            NodeStatus::Skipped => f.write_str("Skipped"),
        }
    }
}

/// Everything that happened to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeOutcome {
    pub node: NodeDescriptor,
    pub role: NodeRole,
    pub steps: Vec<StepResult>,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl NodeOutcome {
    pub fn skipped(node: &NodeDescriptor, role: NodeRole, reason: impl Into<String>) -> Self {
        Self {
            node: node.clone(),
            role,
            steps: Vec::new(),
            status: NodeStatus::Skipped,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn step(&self, phase: Phase) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.phase == phase)
    }

    #[cfg(test)]
    pub fn phases(&self) -> Vec<Phase> {
        self.steps.iter().map(|s| s.phase).collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.steps.iter().map(|s| s.elapsed).sum()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &SoftCheckWarning> {
        self.steps.iter().flat_map(|s| s.warnings.iter())
    }

    /// Uncordon ran and failed: the node may still be unschedulable.
    pub fn needs_manual_uncordon(&self) -> bool {
        self.step(Phase::Uncordon).is_some_and(|s| !s.succeeded)
    }
}

/// Why a run stopped before reaching every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AbortReason {
    Connectivity { host: String, detail: String },
    ControlPlaneFailed,
    UserDeclined { after: String },
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Connectivity { host, detail } => {
                write!(f, "preflight failed: {} unreachable ({})", host, detail)
            }
            AbortReason::ControlPlaneFailed => f.write_str("control plane upgrade failed"),
            AbortReason::UserDeclined { after } => {
                write!(f, "operator declined to continue after {} failed", after)
            }
            AbortReason::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Worker totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The single artifact a run hands back.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub plan: UpgradePlan,
    /// `None` when the plan does not upgrade the control plane.
    pub control: Option<NodeOutcome>,
    pub workers: Vec<NodeOutcome>,
    pub abort: Option<AbortReason>,
    /// Post-run cluster health; `None` when verification was skipped or
    /// the run never got that far.
    pub cluster_health: Option<Result<String, SoftCheckWarning>>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    pub fn totals(&self) -> Totals {
        let mut totals = Totals::default();
        for outcome in &self.workers {
            match outcome.status {
                NodeStatus::Succeeded => totals.succeeded += 1,
                NodeStatus::Failed => totals.failed += 1,
                NodeStatus::Skipped => totals.skipped += 1,
            }
        }
        totals.attempted = totals.succeeded + totals.failed;
        totals
    }

    /// Control outcome (if any) followed by workers in plan order.
    pub fn outcomes(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.control.iter().chain(self.workers.iter())
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes().any(|o| o.status == NodeStatus::Failed)
    }

    /// True when every node in the plan was upgraded.
    pub fn is_success(&self) -> bool {
        self.abort.is_none() && self.outcomes().all(|o| o.status == NodeStatus::Succeeded)
    }

    /// Process exit code: 0 on full success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((d.as_secs_f64() * 1000.0).round() / 1000.0)
}

/// Format a duration as `1m 05s` / `42s` / `0.3s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else if secs >= 1 {
        format!("{}s", secs)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
