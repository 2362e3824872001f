//! kru - rolling kubeadm cluster upgrade CLI tool.
//!
//! Upgrades a kubeadm cluster one node at a time over SSH:
//! - Connectivity preflight for every node
//! - Control node upgrade (kubeadm upgrade apply)
//! - Worker drain, package upgrade, readiness wait, uncordon and verification
//! - Run summary with rollback guidance on failure

mod config;
mod error;
mod k8s;
mod output;
mod packages;
mod prompt;
mod remote;
mod upgrade;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use config::{Args, Config};
use error::KruError;
use output::{print_plan, print_rollback_guidance, print_summary, print_verify_report, save_report};
use prompt::{AutoApprove, DialoguerPrompter, Prompter};
use remote::{RemoteExecutor, SshTransport};
use upgrade::{ClusterUpgradeOrchestrator, verify_cluster};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    // Initialize logging
    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    debug!("Starting kru - rolling kubeadm upgrade");

    match run(&config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            let code = e.downcast_ref::<KruError>().map_or(1, KruError::exit_code);
            std::process::exit(code);
        }
    }
}

/// Main application logic. Returns the process exit code.
async fn run(config: &Config) -> Result<i32> {
    let plan = config.to_plan()?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        warn!("Received interrupt, stopping after the current node");
        token.cancel();
    });

    let transport = Arc::new(SshTransport::new(
        config.ssh.user.clone(),
        config.ssh.port,
        config.ssh.identity.clone(),
        config.ssh.connect_timeout,
    ));
    let executor = RemoteExecutor::new(
        transport,
        plan.mode().dry_run,
        plan.timing().command_timeout,
    );

    if config.verify_only {
        println!("{}", "=== Verifying cluster nodes ===".cyan().bold());
        let report = verify_cluster(&plan, &executor).await;
        print_verify_report(&report);
        if let Some(ref path) = config.report {
            let saved = save_report(&report, path)?;
            println!("Report saved: {}", saved.display());
        }
        return Ok(report.exit_code());
    }

    print_plan(&plan);

    if !plan.mode().auto_approve && !plan.mode().dry_run && !prompt::confirm_start()? {
        return Err(KruError::UserCancelled.into());
    }

    let prompter: Box<dyn Prompter> = if plan.mode().auto_approve {
        Box::new(AutoApprove)
    } else {
        Box::new(DialoguerPrompter)
    };

    let summary = ClusterUpgradeOrchestrator::new(&executor, prompter.as_ref(), cancel)
        .run(&plan)
        .await;

    print_summary(&summary);
    if summary.has_failures() {
        print_rollback_guidance();
    }

    if let Some(ref path) = config.report {
        let saved = save_report(&summary, path)?;
        println!("Report saved: {}", saved.display());
    }

    info!(exit_code = summary.exit_code(), "Done");
    Ok(summary.exit_code())
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
