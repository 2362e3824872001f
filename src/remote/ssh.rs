//! OpenSSH transport.
//!
//! Shells out to the system `ssh` binary so that the operator's existing
//! agent, known_hosts and `~/.ssh/config` apply unchanged.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{RawOutput, Transport};
use crate::error::KruError;

/// ssh reserves exit status 255 for its own errors.
const SSH_CONNECTION_ERROR: i32 = 255;

/// Connection parameters shared by every host.
#[derive(Debug, Clone)]
pub struct SshTransport {
    user: Option<String>,
    port: Option<u16>,
    identity: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshTransport {
    pub fn new(
        user: Option<String>,
        port: Option<u16>,
        identity: Option<PathBuf>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            user,
            port,
            identity,
            connect_timeout,
        }
    }

    /// Arguments passed to `ssh` ahead of the remote command.
    fn ssh_args(&self, host: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];

        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        if let Some(ref identity) = self.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        let destination = match self.user {
            Some(ref user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };
        args.push(destination);
        args.push("--".to_string());
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<RawOutput, KruError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(host))
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing: {:?}", cmd);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| KruError::CommandTimeout {
                host: host.to_string(),
                seconds: timeout.as_secs(),
            })?
            .map_err(|e| KruError::Transport {
                host: host.to_string(),
                detail: format!("failed to spawn ssh: {}", e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // Killed by a signal: no exit code to report.
        let Some(exit_code) = output.status.code() else {
            return Err(KruError::Transport {
                host: host.to_string(),
                detail: format!("ssh terminated: {}", output.status),
            });
        };

        if exit_code == SSH_CONNECTION_ERROR {
            return Err(KruError::Transport {
                host: host.to_string(),
                detail: stderr.trim().to_string(),
            });
        }

        Ok(RawOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    fn name(&self) -> &str {
        "ssh"
    }
}
