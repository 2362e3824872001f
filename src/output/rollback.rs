//! Manual recovery guidance shown after a failed run. Nothing here is executed.

use colored::Colorize;

use crate::packages::{REPO_LIST, backup_path};

/// Static remediation steps, independent of the plan.
pub fn rollback_guidance() -> Vec<String> {
    vec![
        format!(
            "Restore the previous apt source from its backup: {}",
            backup_path(REPO_LIST, "<timestamp>")
        ),
        "Downgrade packages on the affected node: \
         apt-mark unhold kubeadm kubelet kubectl && \
         apt-get install -y --allow-downgrades kubeadm=<previous> kubelet=<previous> kubectl=<previous> && \
         apt-mark hold kubeadm kubelet kubectl"
            .to_string(),
        "Restart the kubelet: systemctl daemon-reload && systemctl restart kubelet".to_string(),
        "Uncordon any node left unschedulable: kubectl uncordon <node>".to_string(),
        "A failed control plane upgrade may need etcd restored from a snapshot taken \
         before the run (etcdctl snapshot restore); take one before retrying."
            .to_string(),
    ]
}

pub fn print_rollback_guidance() {
    println!();
    println!("{}", "Rollback guidance (manual):".yellow().bold());
    for (i, step) in rollback_guidance().iter().enumerate() {
        println!("  {}. {}", i + 1, step);
    }
}
