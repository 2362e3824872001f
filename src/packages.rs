//! Package-manager command builders for kubeadm nodes (Debian/Ubuntu, pkgs.k8s.io).
//!
//! Each function is a pure mapping from typed parameters to a
//! [`RemoteCommand`]; nothing here talks to a host.

use std::time::Duration;

use crate::remote::RemoteCommand;
use crate::upgrade::plan::PackageVersion;
use crate::upgrade::types::NodeRole;

/// apt source for the Kubernetes community repository.
pub const REPO_LIST: &str = "/etc/apt/sources.list.d/kubernetes.list";

/// Keyring referenced by [`REPO_LIST`].
pub const REPO_KEYRING: &str = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";

/// Floor for `kubeadm upgrade apply`, which pulls images and restarts every
/// static pod in turn.
pub const KUBEADM_APPLY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Kubernetes node packages managed by the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Package {
    Kubeadm,
    Kubelet,
    Kubectl,
}

impl Package {
    pub fn as_str(&self) -> &'static str {
        match self {
            Package::Kubeadm => "kubeadm",
            Package::Kubelet => "kubelet",
            Package::Kubectl => "kubectl",
        }
    }
}

/// Backup path for a file, e.g. `kubernetes.list.backup.20261017-101500`.
pub fn backup_path(path: &str, timestamp: &str) -> String {
    format!("{}.backup.{}", path, timestamp)
}

/// Point the apt repository at the target minor release, keeping a backup of
/// the previous source list.
pub fn point_repository_at(version: &PackageVersion, timestamp: &str) -> RemoteCommand {
    let base = format!(
        "https://pkgs.k8s.io/core:/stable:/{}/deb/",
        version.minor_series()
    );
    RemoteCommand::elevated(format!(
        "set -e; \
         key=$(mktemp); trap 'rm -f \"$key\"' EXIT; \
         curl -fsSL -o \"$key\" {base}Release.key; \
         if [ -f {list} ]; then cp -p {list} {backup}; fi; \
         gpg --dearmor --yes -o {keyring} \"$key\"; \
         echo 'deb [signed-by={keyring}] {base} /' > {list}; \
         apt-get update -q",
        list = REPO_LIST,
        backup = backup_path(REPO_LIST, timestamp),
        base = base,
        keyring = REPO_KEYRING,
    ))
}

/// Install the exact target version of `packages` and hold them there.
pub fn install_pinned(packages: &[Package], version: &PackageVersion) -> RemoteCommand {
    let names: Vec<&str> = packages.iter().map(|p| p.as_str()).collect();
    let pinned: Vec<String> = names.iter().map(|n| format!("{}={}", n, version)).collect();

    RemoteCommand::elevated(format!(
        "set -e; \
         apt-mark unhold {names}; \
         DEBIAN_FRONTEND=noninteractive apt-get install -y -q --allow-change-held-packages {pinned}; \
         apt-mark hold {names}",
        names = names.join(" "),
        pinned = pinned.join(" "),
    ))
}

/// Apply the new control-plane manifests (control) or kubelet config (worker).
pub fn kubeadm_upgrade(role: NodeRole, version: &PackageVersion) -> RemoteCommand {
    match role {
        NodeRole::Control => RemoteCommand::elevated(format!(
            "kubeadm upgrade apply {} -y",
            version.kubernetes_version()
        ))
        .with_min_timeout(KUBEADM_APPLY_TIMEOUT),
        NodeRole::Worker => RemoteCommand::elevated("kubeadm upgrade node"),
    }
}

/// Pick up the new kubelet binary.
pub fn restart_kubelet() -> RemoteCommand {
    RemoteCommand::elevated("systemctl daemon-reload && systemctl restart kubelet")
}

/// Read-only version probes run during verification.
pub fn version_checks() -> Vec<RemoteCommand> {
    vec![
        RemoteCommand::plain("kubelet --version"),
        RemoteCommand::plain("kubeadm version -o short"),
        RemoteCommand::plain("kubectl version --client"),
    ]
}

/// A labelled step of the package-upgrade phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStep {
    pub label: &'static str,
    pub command: RemoteCommand,
}

/// Full package-upgrade sequence for a node, in execution order.
///
/// kubeadm goes first and drives the cluster-side upgrade; kubelet and
/// kubectl follow, then the kubelet restart.
pub fn upgrade_sequence(
    role: NodeRole,
    version: &PackageVersion,
    timestamp: &str,
) -> Vec<PackageStep> {
    let kubeadm_label = match role {
        NodeRole::Control => "kubeadm upgrade apply",
        NodeRole::Worker => "kubeadm upgrade node",
    };

    vec![
        PackageStep {
            label: "point repository",
            command: point_repository_at(version, timestamp),
        },
        PackageStep {
            label: "install kubeadm",
            command: install_pinned(&[Package::Kubeadm], version),
        },
        PackageStep {
            label: kubeadm_label,
            command: kubeadm_upgrade(role, version),
        },
        PackageStep {
            label: "install kubelet/kubectl",
            command: install_pinned(&[Package::Kubelet, Package::Kubectl], version),
        },
        PackageStep {
            label: "restart kubelet",
            command: restart_kubelet(),
        },
    ]
}
