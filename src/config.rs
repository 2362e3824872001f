//! CLI configuration, argument parsing and inventory files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::error::KruError;
use crate::upgrade::{NodeDescriptor, RunMode, Timing, UpgradePlan};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Rolling kubeadm cluster upgrade CLI tool.
///
/// Upgrades the control node, then drains, upgrades and uncordons each
/// worker in order, one node at a time.
#[derive(Parser, Debug, Clone)]
#[command(name = "kru")]
#[command(about = "Rolling kubeadm cluster upgrade CLI tool")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Target package version (e.g., 1.33.1-1.1)
    #[arg(short, long, env = "KRU_TARGET")]
    pub target: String,

    /// Control node (format: NAME=HOST, or HOST when both are equal)
    #[arg(short, long, value_name = "NAME=HOST")]
    pub control: Option<String>,

    /// Worker node, upgraded in the order given (repeatable)
    #[arg(short, long = "worker", value_name = "NAME=HOST")]
    pub workers: Vec<String>,

    /// YAML inventory with control and workers
    #[arg(short, long, env = "KRU_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Print every command without running anything
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Do not drain (or uncordon) workers
    #[arg(long, default_value = "false")]
    pub skip_drain: bool,

    /// Skip post-upgrade diagnostics
    #[arg(long, default_value = "false")]
    pub skip_verification: bool,

    /// Leave the control node alone and upgrade workers only
    #[arg(long, default_value = "false")]
    pub workers_only: bool,

    /// Skip confirmation prompts and continue past failed workers
    #[arg(short, long, default_value = "false")]
    pub yes: bool,

    /// Only check node health and versions, change nothing
    #[arg(long, default_value = "false")]
    pub verify_only: bool,

    /// Timeout for a single remote command, in seconds
    #[arg(long, default_value = "300", value_name = "SECS")]
    pub command_timeout: u64,

    /// Timeout passed to kubectl drain, in seconds
    #[arg(long, default_value = "300", value_name = "SECS")]
    pub drain_timeout: u64,

    /// Pause between workers, in seconds
    #[arg(long, default_value = "30", value_name = "SECS")]
    pub node_pause: u64,

    /// Pause after the control node before touching workers, in seconds
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub control_plane_settle: u64,

    /// How long to wait for a node to become Ready, in seconds
    #[arg(long, default_value = "300", value_name = "SECS")]
    pub ready_timeout: u64,

    /// Interval between readiness queries, in seconds
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub ready_interval: u64,

    /// SSH connection timeout, in seconds
    #[arg(long, default_value = "10", value_name = "SECS")]
    pub connect_timeout: u64,

    /// SSH user
    #[arg(long, env = "KRU_SSH_USER")]
    pub ssh_user: Option<String>,

    /// SSH port
    #[arg(long, env = "KRU_SSH_PORT")]
    pub ssh_port: Option<u16>,

    /// SSH private key
    #[arg(long, env = "KRU_SSH_IDENTITY")]
    pub ssh_identity: Option<PathBuf>,

    /// Write the run summary as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "KRU_LOG_LEVEL")]
    pub log_level: String,
}

/// SSH connection settings.
#[derive(Debug, Clone, Default)]
pub struct SshOptions {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity: Option<PathBuf>,
    pub connect_timeout: Duration,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: String,
    pub control: Option<NodeDescriptor>,
    pub workers: Vec<NodeDescriptor>,
    pub inventory: Option<PathBuf>,
    pub mode: RunMode,
    pub timing: Timing,
    pub verify_only: bool,
    pub ssh: SshOptions,
    pub report: Option<PathBuf>,
    pub log_level: String,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            target: args.target,
            control: args.control.as_deref().map(NodeDescriptor::parse),
            workers: args.workers.iter().map(|s| NodeDescriptor::parse(s)).collect(),
            inventory: args.inventory,
            mode: RunMode {
                dry_run: args.dry_run,
                skip_drain: args.skip_drain,
                skip_verification: args.skip_verification,
                workers_only: args.workers_only,
                auto_approve: args.yes,
            },
            timing: Timing {
                command_timeout: Duration::from_secs(args.command_timeout),
                drain_timeout: Duration::from_secs(args.drain_timeout),
                node_pause: Duration::from_secs(args.node_pause),
                control_plane_settle: Duration::from_secs(args.control_plane_settle),
                ready_timeout: Duration::from_secs(args.ready_timeout),
                ready_interval: Duration::from_secs(args.ready_interval),
            },
            verify_only: args.verify_only,
            ssh: SshOptions {
                user: args.ssh_user,
                port: args.ssh_port,
                identity: args.ssh_identity,
                connect_timeout: Duration::from_secs(args.connect_timeout),
            },
            report: args.report,
            log_level: args.log_level,
        }
    }

    /// Merge the inventory (if any) with CLI nodes and validate the result.
    pub fn to_plan(&self) -> Result<UpgradePlan> {
        if self.ssh.connect_timeout.is_zero() {
            return Err(KruError::config("connect timeout must be greater than zero").into());
        }

        let inventory = match self.inventory {
            Some(ref path) => Some(Inventory::load(path)?),
            None => None,
        };
        let (control, workers) = resolve_nodes(self.control.clone(), &self.workers, inventory)?;

        Ok(UpgradePlan::new(
            &self.target,
            control,
            workers,
            self.mode,
            self.timing,
        )?)
    }
}

/// `--control` overrides the inventory control node; `--worker` entries are
/// appended after inventory workers.
fn resolve_nodes(
    control: Option<NodeDescriptor>,
    workers: &[NodeDescriptor],
    inventory: Option<Inventory>,
) -> Result<(NodeDescriptor, Vec<NodeDescriptor>), KruError> {
    let (inv_control, mut all_workers) = match inventory {
        Some(inv) => (
            inv.control.map(NodeEntry::into_descriptor),
            inv.workers
                .into_iter()
                .map(NodeEntry::into_descriptor)
                .collect(),
        ),
        None => (None, Vec::new()),
    };
    all_workers.extend(workers.iter().cloned());

    let control = control.or(inv_control).ok_or_else(|| {
        KruError::config("a control node is required (--control or inventory 'control')")
    })?;
    Ok((control, all_workers))
}

/// Node list loaded from YAML.
///
/// ```yaml
/// control:
///   name: cp1
///   host: 10.0.0.10
/// workers:
///   - name: w1
///     host: 10.0.0.11
///   - name: w2   # host defaults to name
/// ```
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inventory {
    pub control: Option<NodeEntry>,
    #[serde(default)]
    pub workers: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeEntry {
    pub name: String,
    pub host: Option<String>,
}

impl NodeEntry {
    fn into_descriptor(self) -> NodeDescriptor {
        let host = self.host.unwrap_or_else(|| self.name.clone());
        NodeDescriptor::new(self.name, host)
    }
}

impl Inventory {
    /// Load an inventory from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read inventory file: {}", path.display()))?;

        let inventory: Inventory = serde_yaml::from_str(&content).map_err(|e| {
            KruError::Inventory(format!("failed to parse {}: {}", path.display(), e))
        })?;

        if inventory.control.is_none() && inventory.workers.is_empty() {
            return Err(KruError::Inventory(format!("{} lists no nodes", path.display())).into());
        }

        Ok(inventory)
    }
}
