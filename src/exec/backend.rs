// src/exec/backend.rs

//! Pluggable command runner abstraction.
//!
//! Handlers talk to a `CommandRunner` instead of spawning processes directly,
//! so tests can swap in a fake that records invocations and returns scripted
//! outcomes.

use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{PrepipeError, Result};

use super::command::{ToolCommand, ToolOutput};

/// Trait abstracting how external tools are run.
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion and report its exit code and output.
    ///
    /// A non-zero exit is *not* an error here; see [`run_checked`].
    fn run<'a>(
        &'a self,
        cmd: &'a ToolCommand,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send + 'a>>;
}

/// Runner used in production: `tokio::process::Command`, output captured.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner;

impl CommandRunner for TokioRunner {
    fn run<'a>(
        &'a self,
        cmd: &'a ToolCommand,
    ) -> Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send + 'a>> {
        Box::pin(async move {
            let mut command = Command::new(&cmd.program);
            command
                .args(&cmd.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            debug!(tool = %cmd.program, cmd = %cmd, "spawning");

            let output = match command.output().await {
                Ok(o) => o,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(PrepipeError::ToolMissing {
                        tool: cmd.program.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(PrepipeError::IoError(e)),
            };

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            for line in stderr.lines() {
                debug!(tool = %cmd.program, "stderr: {}", line);
            }

            Ok(ToolOutput {
                code: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            })
        })
    }
}

/// Run `cmd` and turn a non-zero exit into [`PrepipeError::ToolFailed`].
pub async fn run_checked(runner: &dyn CommandRunner, cmd: &ToolCommand) -> Result<ToolOutput> {
    info!(tool = %cmd.program, "Running {}", cmd);
    let output = runner.run(cmd).await?;
    if output.success() {
        Ok(output)
    } else {
        warn!(tool = %cmd.program, exit_code = output.code, "tool failed");
        Err(PrepipeError::ToolFailed {
            tool: cmd.program.clone(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}
