//! Typed `kubectl` command builders.
//!
//! Every command runs on the control node against the kubeadm admin
//! kubeconfig. Node names are validated as DNS-1123 subdomains before a plan
//! is accepted, so they are interpolated without quoting.

use std::time::Duration;

use crate::remote::RemoteCommand;

/// Kubeconfig written by `kubeadm init`; root-only on a stock install.
pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

fn kubectl(args: &str) -> RemoteCommand {
    RemoteCommand::elevated(format!("kubectl --kubeconfig {} {}", ADMIN_KUBECONFIG, args))
}

/// Headroom over `kubectl drain --timeout` so kubectl reports its own
/// eviction failure before the transport gives up.
pub const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Cordon the node and evict its workloads.
pub fn drain(node_name: &str, timeout: Duration) -> RemoteCommand {
    kubectl(&format!(
        "drain {} --ignore-daemonsets --delete-emptydir-data --timeout={}s",
        node_name,
        timeout.as_secs()
    ))
    .with_min_timeout(timeout + DRAIN_GRACE)
}

/// Mark the node schedulable again.
pub fn uncordon(node_name: &str) -> RemoteCommand {
    kubectl(&format!("uncordon {}", node_name))
}

/// Status of the node's `Ready` condition (`True`, `False` or `Unknown`).
pub fn node_ready(node_name: &str) -> RemoteCommand {
    kubectl(&format!(
        r#"get node {} -o jsonpath='{{.status.conditions[?(@.type=="Ready")].status}}'"#,
        node_name
    ))
}

/// Wide node listing used as the cluster-wide health summary.
pub fn cluster_health() -> RemoteCommand {
    kubectl("get nodes -o wide")
}

/// kube-system pods, shown during verification.
pub fn system_pods() -> RemoteCommand {
    kubectl("get pods -n kube-system -o wide")
}

/// Interpret the output of [`node_ready`].
pub fn parse_ready_status(output: &str) -> bool {
    output.trim().trim_matches('\'').eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_command() {
        let cmd = drain("w1", Duration::from_secs(300));
        assert!(cmd.elevate);
        assert_eq!(
            cmd.script,
            "kubectl --kubeconfig /etc/kubernetes/admin.conf drain w1 --ignore-daemonsets --delete-emptydir-data --timeout=300s"
        );
    }

    #[test]
    fn test_drain_outlives_its_own_timeout() {
        let cmd = drain("w1", Duration::from_secs(600));
        assert_eq!(cmd.min_timeout, Some(Duration::from_secs(630)));
        assert_eq!(uncordon("w1").min_timeout, None);
    }

    #[test]
    fn test_uncordon_command() {
        let cmd = uncordon("worker-2.example.com");
        assert_eq!(
            cmd.script,
            "kubectl --kubeconfig /etc/kubernetes/admin.conf uncordon worker-2.example.com"
        );
    }

    #[test]
    fn test_node_ready_command_queries_ready_condition() {
        let cmd = node_ready("w1");
        assert!(cmd.script.contains("get node w1 -o jsonpath="));
        assert!(
            cmd.script
                .contains(r#"{.status.conditions[?(@.type=="Ready")].status}"#)
        );
    }

    #[test]
    fn test_parse_ready_status() {
        assert!(parse_ready_status("True"));
        assert!(parse_ready_status("True\n"));
        assert!(parse_ready_status("'True'"));
        assert!(!parse_ready_status("False"));
        assert!(!parse_ready_status("Unknown"));
        assert!(!parse_ready_status(""));
    }

    #[test]
    fn test_health_commands() {
        assert!(cluster_health().script.ends_with("get nodes -o wide"));
        assert!(system_pods().script.contains("-n kube-system"));
    }
}
