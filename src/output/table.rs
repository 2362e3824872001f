//! Console rendering of plans, run summaries and verification results.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::upgrade::types::{NodeOutcome, NodeStatus, RunSummary, format_duration};
use crate::upgrade::{UpgradePlan, VerifyReport};

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "HOST")]
    host: String,
    #[tabled(rename = "ROLE")]
    role: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PHASES")]
    phases: String,
    #[tabled(rename = "DURATION")]
    duration: String,
}

#[derive(Tabled)]
struct HealthRow {
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "HOST")]
    host: String,
    #[tabled(rename = "ROLE")]
    role: String,
    #[tabled(rename = "READY")]
    ready: String,
    #[tabled(rename = "VERSION")]
    version: String,
    #[tabled(rename = "WARNINGS")]
    warnings: String,
}

/// Print what a run is about to do.
pub fn print_plan(plan: &UpgradePlan) {
    let mode = plan.mode();
    let timing = plan.timing();

    println!();
    println!(
        "{}",
        format!("Rolling Upgrade Plan: {}", plan.target()).bold()
    );
    println!("{}", "=".repeat(60));
    if mode.dry_run {
        println!("{}", "[DRY RUN] No changes will be made.".yellow());
    }

    println!();
    if plan.upgrades_control_plane() {
        println!("{}", "Control Node:".cyan().bold());
        println!(
            "  {} -> kubeadm upgrade apply {}",
            plan.control(),
            plan.target().kubernetes_version()
        );
    } else {
        println!("{}", "Control Node [SKIPPED] (workers-only)".cyan().bold());
        println!("  {} {}", "→".cyan(), plan.control());
    }

    println!();
    println!("{}", "Workers (in order):".cyan().bold());
    if plan.workers().is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (i, worker) in plan.workers().iter().enumerate() {
        println!("  {}. {}", i + 1, worker);
    }

    println!();
    let mut flags = Vec::new();
    if mode.skip_drain {
        flags.push("skip-drain");
    }
    if mode.skip_verification {
        flags.push("skip-verification");
    }
    if mode.auto_approve {
        flags.push("auto-approve");
    }
    if !flags.is_empty() {
        println!("Options: {}", flags.join(", ").yellow());
    }
    println!(
        "Timing: node pause {}, control plane settle {}, ready timeout {} (every {})",
        format_duration(timing.node_pause),
        format_duration(timing.control_plane_settle),
        format_duration(timing.ready_timeout),
        format_duration(timing.ready_interval),
    );
    println!();
}

fn status_cell(outcome: &NodeOutcome) -> String {
    match outcome.status {
        NodeStatus::Succeeded if outcome.needs_manual_uncordon() => {
            "Succeeded*".yellow().to_string()
        }
        NodeStatus::Succeeded => "Succeeded".green().to_string(),
        NodeStatus::Failed => "Failed".red().to_string(),
        NodeStatus::Skipped => "Skipped".dimmed().to_string(),
    }
}

fn phases_cell(outcome: &NodeOutcome) -> String {
    if outcome.steps.is_empty() {
        return outcome
            .skip_reason
            .clone()
            .unwrap_or_else(|| "-".to_string());
    }

    outcome
        .steps
        .iter()
        .map(|s| {
            let mark = if s.succeeded { "✓" } else { "✗" };
            format!("{}{}", s.phase, mark)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn outcome_row(outcome: &NodeOutcome) -> OutcomeRow {
    let duration = if outcome.steps.is_empty() {
        "-".to_string()
    } else {
        format_duration(outcome.elapsed())
    };

    OutcomeRow {
        node: outcome.node.name.clone(),
        host: outcome.node.host.clone(),
        role: outcome.role.to_string(),
        status: status_cell(outcome),
        phases: phases_cell(outcome),
        duration,
    }
}

/// Print the per-node table, totals and anything that needs an operator.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "=".repeat(60));
    println!("{}", "Upgrade Summary".bold());
    println!();

    if summary.control.is_none() {
        println!(
            "  {} {} skipped (workers-only)",
            "→".cyan(),
            summary.plan.control()
        );
    }

    let rows: Vec<OutcomeRow> = summary.outcomes().map(outcome_row).collect();
    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{}", table);

    let totals = summary.totals();
    println!();
    println!(
        "Workers: {} attempted, {} succeeded, {} failed, {} skipped (total {})",
        totals.attempted,
        totals.succeeded.to_string().green(),
        totals.failed.to_string().red(),
        totals.skipped,
        format_duration(summary.duration())
    );

    for outcome in summary.outcomes().filter(|o| o.needs_manual_uncordon()) {
        println!(
            "  {} {} may still be cordoned: run `kubectl uncordon {}`",
            "⚠".yellow(),
            outcome.node.name.bold(),
            outcome.node.name
        );
    }

    let warnings: Vec<_> = summary.outcomes().flat_map(|o| o.warnings()).collect();
    if !warnings.is_empty() {
        println!();
        println!("{}", "Verification warnings:".yellow().bold());
        for warning in warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    match summary.cluster_health {
        Some(Ok(ref nodes)) if !nodes.is_empty() => {
            println!();
            println!("{}", "Cluster nodes:".bold());
            for line in nodes.lines() {
                println!("  {}", line);
            }
        }
        Some(Err(ref warning)) => {
            println!();
            println!("  {} cluster health check failed: {}", "⚠".yellow(), warning);
        }
        _ => {}
    }

    println!();
    let status = final_status(summary);
    if summary.is_success() {
        println!("{}", status.green().bold());
    } else {
        println!("{}", status.red().bold());
    }
    println!("{}", "=".repeat(60));
}

/// The one line that tells the operator how the run ended.
fn final_status(summary: &RunSummary) -> String {
    match summary.abort {
        Some(ref abort) => format!("Run aborted: {}", abort),
        None if summary.is_success() => {
            format!("Upgrade complete: all nodes at {}", summary.plan.target())
        }
        None => "Upgrade finished with failures.".to_string(),
    }
}

/// Print verify-only results.
pub fn print_verify_report(report: &VerifyReport) {
    println!();
    if let Some(ref err) = report.preflight_error {
        println!("{} {}", "✗".red(), err);
        return;
    }

    let rows: Vec<HealthRow> = report
        .nodes
        .iter()
        .map(|n| HealthRow {
            node: n.node.name.clone(),
            host: n.node.host.clone(),
            role: n.role.to_string(),
            ready: if n.ready {
                "True".green().to_string()
            } else {
                "False".red().to_string()
            },
            version: n.versions.first().cloned().unwrap_or_else(|| "-".to_string()),
            warnings: n.warnings.len().to_string(),
        })
        .collect();

    let mut table = Table::new(&rows);
    apply_table_style(&mut table);
    println!("{}", table);

    for warning in report.nodes.iter().flat_map(|n| n.warnings.iter()) {
        println!("  {} {}", "⚠".yellow(), warning);
    }

    println!();
    println!(
        "{} of {} nodes healthy",
        report.healthy_count(),
        report.nodes.len()
    );
}

fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Local;

    use super::*;
    use crate::upgrade::types::{AbortReason, NodeRole, Phase, StepResult};
    use crate::upgrade::{NodeDescriptor, RunMode, Timing};

    fn summary(workers: Vec<NodeOutcome>, abort: Option<AbortReason>) -> RunSummary {
        let plan = UpgradePlan::new(
            "1.33.1-1.1",
            NodeDescriptor::new("cp1", "10.0.0.10"),
            vec![NodeDescriptor::new("w1", "10.0.0.11")],
            RunMode {
                workers_only: true,
                ..Default::default()
            },
            Timing::default(),
        )
        .unwrap();
        RunSummary {
            plan,
            control: None,
            workers,
            abort,
            cluster_health: None,
            started_at: Local::now(),
            finished_at: Local::now(),
        }
    }

    fn worker(steps: Vec<StepResult>, status: NodeStatus) -> NodeOutcome {
        NodeOutcome {
            node: NodeDescriptor::new("w1", "10.0.0.11"),
            role: NodeRole::Worker,
            steps,
            status,
            skip_reason: None,
        }
    }

    #[test]
    fn test_phases_cell_marks_each_step() {
        let outcome = worker(
            vec![
                StepResult::success(Phase::Drain, Duration::from_secs(1)),
                StepResult::failure(Phase::PackageUpgrade, "boom", Duration::from_secs(2)),
                StepResult::success(Phase::Uncordon, Duration::from_secs(1)).as_compensation(),
            ],
            NodeStatus::Failed,
        );
        assert_eq!(
            phases_cell(&outcome),
            "drain✓ package-upgrade✗ uncordon✓"
        );
    }

    #[test]
    fn test_phases_cell_skipped_shows_reason() {
        let outcome = NodeOutcome::skipped(
            &NodeDescriptor::new("w2", "10.0.0.12"),
            NodeRole::Worker,
            "operator declined to continue",
        );
        assert_eq!(phases_cell(&outcome), "operator declined to continue");
        assert_eq!(outcome_row(&outcome).duration, "-");
    }

    #[test]
    fn test_outcome_row_duration_sums_steps() {
        let outcome = worker(
            vec![
                StepResult::success(Phase::Drain, Duration::from_secs(30)),
                StepResult::success(Phase::PackageUpgrade, Duration::from_secs(45)),
            ],
            NodeStatus::Succeeded,
        );
        let row = outcome_row(&outcome);
        assert_eq!(row.duration, "1m 15s");
        assert_eq!(row.role, "worker");
    }

    #[test]
    fn test_final_status_reports_abort_reason() {
        let skipped = NodeOutcome::skipped(
            &NodeDescriptor::new("w1", "10.0.0.11"),
            NodeRole::Worker,
            "cancelled",
        );
        let aborted = summary(vec![skipped], Some(AbortReason::Cancelled));
        assert_eq!(final_status(&aborted), "Run aborted: run cancelled");

        let done = summary(
            vec![worker(
                vec![StepResult::success(Phase::Drain, Duration::from_secs(1))],
                NodeStatus::Succeeded,
            )],
            None,
        );
        assert_eq!(
            final_status(&done),
            "Upgrade complete: all nodes at 1.33.1-1.1"
        );

        let failed = summary(vec![worker(vec![], NodeStatus::Failed)], None);
        assert_eq!(final_status(&failed), "Upgrade finished with failures.");
    }
}
