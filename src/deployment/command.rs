//! # Command Execution
//!
//! Runs the provisioning tool as a child process and converts its exit codes
//! into tagged outcomes at the boundary, so nothing downstream inspects raw
//! exit statuses.

use crate::deployment::ManagerError;
use crate::observability::metrics;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::debug;

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short human-readable reason for a failed invocation
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        let code = self
            .code
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit status {c}"));
        if stderr.is_empty() {
            code
        } else {
            format!("{code}: {}", last_lines(stderr, 5))
        }
    }
}

/// Result of the drift check (`plan -detailed-exitcode`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Exit 0: deployed state matches the configuration
    Clean,
    /// Exit 2: the configuration differs from deployed state
    ChangesPending,
    /// Any other exit: the tool could not determine drift
    Failed(String),
}

impl From<&CommandOutput> for PlanOutcome {
    fn from(output: &CommandOutput) -> Self {
        match output.code {
            Some(0) => PlanOutcome::Clean,
            Some(2) => PlanOutcome::ChangesPending,
            _ => PlanOutcome::Failed(output.failure_reason()),
        }
    }
}

/// Spawns tool processes inside a working directory
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Run the tool with `args` in `dir`
    ///
    /// Returns `Err` only when the process could not be run to completion
    /// (spawn failure, timeout). A non-zero exit is a successful `Ok` carrying
    /// the exit code.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, ManagerError>;
}

/// Runs a real executable with a per-invocation timeout
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: PathBuf,
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Resolve `binary` on `PATH` (paths containing a separator are used as-is)
    pub fn locate(binary: &str, timeout: Duration) -> Result<Self, ManagerError> {
        let program = which::which(binary).map_err(|e| ManagerError::ToolNotFound {
            program: binary.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(program, timeout))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<CommandOutput, ManagerError> {
        let operation = args.first().copied().unwrap_or("");
        let start = Instant::now();
        debug!(
            program = %self.program.display(),
            dir = %dir.display(),
            ?args,
            "Running terraform"
        );

        let child = tokio::process::Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ManagerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                metrics::record_tool_invocation(operation, "error", start.elapsed().as_secs_f64());
                return Err(ManagerError::Spawn {
                    program: self.program.display().to_string(),
                    source,
                });
            }
            Err(_) => {
                metrics::record_tool_invocation(operation, "timeout", start.elapsed().as_secs_f64());
                return Err(ManagerError::Timeout {
                    operation: operation.to_string(),
                    timeout: self.timeout,
                });
            }
        };

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        let outcome = match result.code {
            Some(0) => "success",
            Some(_) => "failure",
            None => "signal",
        };
        metrics::record_tool_invocation(operation, outcome, start.elapsed().as_secs_f64());
        debug!(operation, code = ?result.code, "terraform finished");
        Ok(result)
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" ")
}
