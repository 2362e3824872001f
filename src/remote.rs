//! Remote command execution.
//!
//! The orchestrator only ever asks "run this command on this host"; how the
//! bytes get there is the [`Transport`]'s business.

pub mod executor;
pub mod ssh;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KruError;

pub use executor::RemoteExecutor;
pub use ssh::SshTransport;

/// Raw result of a command that reached the remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a shell command on a remote host.
///
/// `Err` means the command could not be delivered (connection refused,
/// authentication failure, timeout); a command that ran and exited non-zero
/// is an `Ok` with that exit code.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(&self, host: &str, command: &str, timeout: Duration)
    -> Result<RawOutput, KruError>;

    fn name(&self) -> &str;
}

/// A command description produced by the typed builders in `k8s` and `packages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub script: String,
    pub elevate: bool,
    /// Lower bound on the delivery timeout for commands that carry their own
    /// deadline or legitimately outlast the configured command timeout.
    pub min_timeout: Option<Duration>,
}

impl RemoteCommand {
    /// Command run as the connecting user.
    pub fn plain(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            elevate: false,
            min_timeout: None,
        }
    }

    /// Command run through `sudo`.
    pub fn elevated(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            elevate: true,
            min_timeout: None,
        }
    }

    pub fn with_min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = Some(timeout);
        self
    }
}

/// Applies elevation to a script. The whole script runs under one `sh -c` so
/// compound commands are elevated end to end, and `-n` keeps sudo from
/// waiting on a password prompt nobody will answer.
pub fn render_command(script: &str, elevate: bool) -> String {
    if elevate {
        format!("sudo -n sh -c {}", shell_quote(script))
    } else {
        script.to_string()
    }
}

/// Single-quotes a string for POSIX sh.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
