//! Immutable upgrade plan and its validation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::KruError;

/// Exact package version, e.g. `1.33.1-1.1` (`MAJOR.MINOR.PATCH-REV.SUB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub revision: u32,
    pub sub: u32,
}

impl PackageVersion {
    /// Repository channel for this version, e.g. `v1.33`.
    pub fn minor_series(&self) -> String {
        format!("v{}.{}", self.major, self.minor)
    }

    /// Kubernetes release this package builds, e.g. `v1.33.1`.
    pub fn kubernetes_version(&self) -> String {
        format!("v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}-{}.{}",
            self.major, self.minor, self.patch, self.revision, self.sub
        )
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_component(part: &str, original: &str) -> Result<u32, KruError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KruError::InvalidVersion(original.to_string()));
    }
    part.parse()
        .map_err(|_| KruError::InvalidVersion(original.to_string()))
}

impl FromStr for PackageVersion {
    type Err = KruError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KruError::InvalidVersion(s.to_string());

        let (upstream, package_rev) = s.split_once('-').ok_or_else(invalid)?;

        let upstream: Vec<&str> = upstream.split('.').collect();
        let package_rev: Vec<&str> = package_rev.split('.').collect();
        if upstream.len() != 3 || package_rev.len() != 2 {
            return Err(invalid());
        }

        Ok(Self {
            major: parse_component(upstream[0], s)?,
            minor: parse_component(upstream[1], s)?,
            patch: parse_component(upstream[2], s)?,
            revision: parse_component(package_rev[0], s)?,
            sub: parse_component(package_rev[1], s)?,
        })
    }
}

/// A cluster node. `host` is where commands run; `name` is what the control
/// plane calls it. They are often equal but never interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub host: String,
}

impl NodeDescriptor {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
        }
    }

    /// Parse `NAME=HOST`; a bare value is used for both.
    pub fn parse(value: &str) -> Self {
        match value.split_once('=') {
            Some((name, host)) => Self::new(name.trim(), host.trim()),
            None => Self::new(value.trim(), value.trim()),
        }
    }
}

impl fmt::Display for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name == self.host {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.host)
        }
    }
}

/// Switches that change what a run does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunMode {
    pub dry_run: bool,
    pub skip_drain: bool,
    pub skip_verification: bool,
    pub workers_only: bool,
    pub auto_approve: bool,
}

/// Durations governing a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timing {
    pub command_timeout: Duration,
    pub drain_timeout: Duration,
    pub node_pause: Duration,
    pub control_plane_settle: Duration,
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            drain_timeout: Duration::from_secs(300),
            node_pause: Duration::from_secs(30),
            control_plane_settle: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(300),
            ready_interval: Duration::from_secs(10),
        }
    }
}

/// Validated upgrade plan. Construct with [`UpgradePlan::new`]; there is no
/// way to change it afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradePlan {
    target: PackageVersion,
    control: NodeDescriptor,
    workers: Vec<NodeDescriptor>,
    mode: RunMode,
    timing: Timing,
}

impl UpgradePlan {
    /// Build and validate a plan.
    pub fn new(
        target: &str,
        control: NodeDescriptor,
        workers: Vec<NodeDescriptor>,
        mode: RunMode,
        timing: Timing,
    ) -> Result<Self, KruError> {
        let target: PackageVersion = target.parse()?;

        if mode.workers_only && workers.is_empty() {
            return Err(KruError::config(
                "--workers-only requires at least one worker node",
            ));
        }

        validate_node(&control)?;
        for worker in &workers {
            validate_node(worker)?;
        }

        let mut names = HashSet::new();
        let mut hosts = HashSet::new();
        for node in std::iter::once(&control).chain(workers.iter()) {
            if !names.insert(node.name.as_str()) {
                return Err(KruError::config(format!(
                    "node name '{}' appears more than once",
                    node.name
                )));
            }
            if !hosts.insert(node.host.as_str()) {
                return Err(KruError::config(format!(
                    "host '{}' appears more than once",
                    node.host
                )));
            }
        }

        validate_timing(&timing)?;

        Ok(Self {
            target,
            control,
            workers,
            mode,
            timing,
        })
    }

    pub fn target(&self) -> &PackageVersion {
        &self.target
    }

    pub fn control(&self) -> &NodeDescriptor {
        &self.control
    }

    pub fn workers(&self) -> &[NodeDescriptor] {
        &self.workers
    }

    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Whether the control node goes through its own upgrade sequence.
    pub fn upgrades_control_plane(&self) -> bool {
        !self.mode.workers_only
    }

    /// Every host the run will talk to, control node first.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.control.host.as_str())
            .chain(self.workers.iter().map(|w| w.host.as_str()))
    }
}

fn validate_node(node: &NodeDescriptor) -> Result<(), KruError> {
    if !is_dns1123_subdomain(&node.name) {
        return Err(KruError::config(format!(
            "invalid node name '{}' (must be a lowercase DNS-1123 subdomain)",
            node.name
        )));
    }
    if !is_valid_host(&node.host) {
        return Err(KruError::config(format!(
            "invalid host '{}' for node '{}'",
            node.host, node.name
        )));
    }
    Ok(())
}

fn validate_timing(timing: &Timing) -> Result<(), KruError> {
    if timing.command_timeout.is_zero() {
        return Err(KruError::config("command timeout must be greater than zero"));
    }
    if timing.ready_interval.is_zero() {
        return Err(KruError::config("readiness poll interval must be greater than zero"));
    }
    if timing.ready_timeout < timing.ready_interval {
        return Err(KruError::config(
            "readiness timeout must not be shorter than the poll interval",
        ));
    }
    Ok(())
}

/// Lowercase alphanumerics, `-` and `.`, starting and ending alphanumeric.
fn is_dns1123_subdomain(name: &str) -> bool {
    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    !bytes.is_empty()
        && bytes.len() <= 253
        && edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| edge_ok(b) || b == b'-' || b == b'.')
}

/// Hostnames, IPv4 and IPv6 literals. Nothing a shell would interpret.
fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && !host.starts_with('-')
        && host
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':'))
}
