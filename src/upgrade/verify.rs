//! Read-only health check of every node in a plan.

use chrono::{DateTime, Local};
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};

use super::plan::{NodeDescriptor, UpgradePlan};
use super::types::NodeRole;
use crate::error::SoftCheckWarning;
use crate::k8s::kubectl;
use crate::packages;
use crate::remote::RemoteExecutor;

/// Health of one node as seen by verify-only mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeHealth {
    pub node: NodeDescriptor,
    pub role: NodeRole,
    pub ready: bool,
    /// First line of each successful version check.
    pub versions: Vec<String>,
    pub warnings: Vec<SoftCheckWarning>,
}

impl NodeHealth {
    pub fn is_healthy(&self) -> bool {
        self.ready && self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub nodes: Vec<NodeHealth>,
    /// Set when preflight failed and no node was checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight_error: Option<String>,
    pub checked_at: DateTime<Local>,
}

impl VerifyReport {
    pub fn healthy_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_healthy()).count()
    }

    /// 0 when every node is healthy, 2 when some are, 1 when none are or
    /// preflight failed.
    pub fn exit_code(&self) -> i32 {
        if self.preflight_error.is_some() {
            return 1;
        }
        match self.healthy_count() {
            n if n == self.nodes.len() => 0,
            0 => 1,
            _ => 2,
        }
    }
}

/// Check every node in the plan without changing anything.
pub async fn verify_cluster(plan: &UpgradePlan, executor: &RemoteExecutor) -> VerifyReport {
    let checked_at = Local::now();

    for host in plan.hosts() {
        if let Err(e) = executor.check_connectivity(host).await {
            warn!("{}", e);
            return VerifyReport {
                nodes: Vec::new(),
                preflight_error: Some(e.to_string()),
                checked_at,
            };
        }
    }

    let control = plan.control();
    let mut nodes = Vec::with_capacity(plan.workers().len() + 1);
    nodes.push(check_node(executor, control, NodeRole::Control, &control.host).await);
    for worker in plan.workers() {
        nodes.push(check_node(executor, worker, NodeRole::Worker, &control.host).await);
    }

    let report = VerifyReport {
        nodes,
        preflight_error: None,
        checked_at,
    };
    info!(
        healthy = report.healthy_count(),
        total = report.nodes.len(),
        "Verification finished"
    );
    report
}

async fn check_node(
    executor: &RemoteExecutor,
    node: &NodeDescriptor,
    role: NodeRole,
    control_host: &str,
) -> NodeHealth {
    println!("  {} {}", "→".cyan(), node);
    let mut warnings = Vec::new();
    let mut versions = Vec::new();

    for cmd in packages::version_checks() {
        match executor.run_soft(&node.host, &cmd).await {
            Ok(outcome) => {
                if let Some(line) = outcome.output().lines().next() {
                    versions.push(line.trim().to_string());
                }
            }
            Err(warning) => warnings.push(warning),
        }
    }

    let ready = match executor
        .run_soft(control_host, &kubectl::node_ready(&node.name))
        .await
    {
        Ok(outcome) => outcome.dry_run || kubectl::parse_ready_status(outcome.output()),
        Err(warning) => {
            warnings.push(warning);
            false
        }
    };

    NodeHealth {
        node: node.clone(),
        role,
        ready,
        versions,
        warnings,
    }
}
