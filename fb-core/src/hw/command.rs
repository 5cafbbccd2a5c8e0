//! Process execution for the control utility
//!
//! Every invocation is bounded by a timeout and the child is killed if the
//! timeout fires. Spawn failures map to `UtilityNotInstalled`; a non-zero
//! exit is returned as a normal [`CommandOutput`] so callers can decide.

use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::trace;

use crate::constants::utility::MAX_DIAGNOSTIC_LEN;
use crate::error::{FanbridgeError, Result};

/// Captured result of one finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Canned successful output, mostly for tests and fakes
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Canned failed output
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Short human-readable reason for a failure: stderr if present,
    /// otherwise stdout, otherwise the exit code.
    pub fn diagnostic(&self) -> String {
        let text = if !self.stderr.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        };

        if text.is_empty() {
            return match self.code {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            };
        }

        let mut out: String = text.chars().take(MAX_DIAGNOSTIC_LEN).collect();
        if out.len() < text.len() {
            out.push_str("...");
        }
        out
    }
}

/// Runs an external program. Abstracted so the device controller can be
/// exercised against canned output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> Result<CommandOutput>;
}

/// Spawns real child processes with tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String], limit: Duration) -> Result<CommandOutput> {
        trace!("exec {} {}", program, args.join(" "));

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(limit, cmd.output()).await {
            Err(_) => Err(FanbridgeError::Timeout(format!(
                "{} {} (after {:?})",
                program,
                args.join(" "),
                limit
            ))),
            Ok(Err(e)) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => {
                Err(FanbridgeError::UtilityNotInstalled(format!("{}: {}", program, e)))
            }
            Ok(Err(e)) => Err(FanbridgeError::command_failed(
                format!("{} {}", program, args.join(" ")),
                e.to_string(),
            )),
            Ok(Ok(output)) => Ok(CommandOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }
}
