//! Dry-run aware command execution against named hosts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{RemoteCommand, Transport, render_command};
use crate::error::{KruError, SoftCheckWarning};

/// Structured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// The command as handed to the transport, elevation included.
    pub command: String,
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The host was never reached.
    pub connection_failed: bool,
    pub dry_run: bool,
}

impl CommandOutcome {
    /// Command output. In dry-run mode this is the command that would have run.
    pub fn output(&self) -> &str {
        self.stdout.trim()
    }

    /// Human-readable failure detail including the attempted command, or
    /// `None` on success.
    pub fn error_detail(&self) -> Option<String> {
        if self.succeeded {
            return None;
        }

        let reason = match self.exit_code {
            Some(code) => {
                let stderr = self.stderr.trim();
                if stderr.is_empty() {
                    format!("exit status {}", code)
                } else {
                    format!("exit status {}: {}", code, last_line(stderr))
                }
            }
            None if self.connection_failed => {
                format!("not delivered: {}", self.stderr.trim())
            }
            None => self.stderr.trim().to_string(),
        };

        Some(format!("{} (command: {})", reason, self.command))
    }
}

fn last_line(s: &str) -> &str {
    s.lines().last().unwrap_or(s)
}

/// Executes commands on remote hosts, honoring dry-run.
#[derive(Clone)]
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    dry_run: bool,
    command_timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>, dry_run: bool, command_timeout: Duration) -> Self {
        Self {
            transport,
            dry_run,
            command_timeout,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute `command` on `host`, optionally elevated.
    ///
    /// Never returns an error: connection failures and non-zero exit codes
    /// become a failed [`CommandOutcome`] carrying the attempted command.
    pub async fn execute(&self, host: &str, command: &str, elevate: bool) -> CommandOutcome {
        self.execute_within(host, command, elevate, self.command_timeout)
            .await
    }

    async fn execute_within(
        &self,
        host: &str,
        command: &str,
        elevate: bool,
        timeout: Duration,
    ) -> CommandOutcome {
        let rendered = render_command(command, elevate);

        if self.dry_run {
            debug!(host = %host, command = %rendered, "[DRY RUN] would execute");
            return CommandOutcome {
                stdout: rendered.clone(),
                command: rendered,
                succeeded: true,
                exit_code: Some(0),
                stderr: String::new(),
                connection_failed: false,
                dry_run: true,
            };
        }

        debug!(host = %host, transport = self.transport.name(), command = %rendered, "Executing remote command");

        match self
            .transport
            .run(host, &rendered, timeout)
            .await
        {
            Ok(raw) => {
                let succeeded = raw.exit_code == 0;
                if !succeeded {
                    debug!(host = %host, exit_code = raw.exit_code, "Remote command failed");
                }
                CommandOutcome {
                    command: rendered,
                    succeeded,
                    exit_code: Some(raw.exit_code),
                    stdout: raw.stdout,
                    stderr: raw.stderr,
                    connection_failed: false,
                    dry_run: false,
                }
            }
            Err(e) => {
                debug!(host = %host, error = %e, "Remote command could not be delivered");
                CommandOutcome {
                    command: rendered,
                    succeeded: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    connection_failed: e.is_connection_failure(),
                    dry_run: false,
                }
            }
        }
    }

    /// Execute a typed command description. A command's own minimum timeout
    /// raises the configured one, never lowers it.
    pub async fn run(&self, host: &str, command: &RemoteCommand) -> CommandOutcome {
        let timeout = command
            .min_timeout
            .map_or(self.command_timeout, |min| min.max(self.command_timeout));
        self.execute_within(host, &command.script, command.elevate, timeout)
            .await
    }

    /// Same contract as [`RemoteExecutor::run`], but a failure comes back as a
    /// warning for diagnostics that must never abort an upgrade.
    pub async fn run_soft(
        &self,
        host: &str,
        command: &RemoteCommand,
    ) -> Result<CommandOutcome, SoftCheckWarning> {
        let outcome = self.run(host, command).await;
        if outcome.succeeded {
            return Ok(outcome);
        }

        let warning = SoftCheckWarning {
            host: host.to_string(),
            command: command.script.clone(),
            detail: outcome
                .error_detail()
                .unwrap_or_else(|| "unknown failure".to_string()),
        };
        warn!("Soft check failed (non-fatal): {}", warning);
        Err(warning)
    }

    /// Cheap no-op round trip used by preflight.
    pub async fn check_connectivity(&self, host: &str) -> Result<(), KruError> {
        let outcome = self.execute(host, "true", false).await;
        if outcome.succeeded {
            debug!(host = %host, "Host reachable");
            Ok(())
        } else {
            Err(KruError::Connectivity {
                host: host.to_string(),
                detail: outcome
                    .error_detail()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            })
        }
    }
}
