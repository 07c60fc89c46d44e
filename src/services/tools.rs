//! Subprocess execution for the static-analysis tools.

use async_trait::async_trait;
use std::{fmt, io, path::Path, process::Stdio, time::Duration};
use thiserror::Error;
use tokio::process::Command;
use tracing::warn;

/// A program plus leading arguments. The sample path is appended last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// Split a command line on whitespace. `None` when it is blank.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("could not start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("`{program}` exited with {code:?}: {stderr}")]
    Exit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{program}` reported errors: {stderr}")]
    Stderr { program: String, stderr: String },
    #[error("`{program}` aborted: {reason}")]
    Aborted { program: String, reason: String },
}

/// Runs a tool against one file and hands back its standard output.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand, path: &Path) -> Result<String, ToolError>;
}

/// Runs tools as child processes.
///
/// A non-zero exit status or anything written to stderr counts as failure.
/// Stdout is decoded lossily and returned untrimmed.
#[derive(Clone, Debug)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, command: &ToolCommand, path: &Path) -> Result<String, ToolError> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ToolError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ToolError::Timeout {
                    program: command.program.clone(),
                    timeout: self.timeout,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            warn!(
                "Error while exec cmd {}. Return code: {:?}. Stderr: {}",
                command,
                output.status.code(),
                stderr
            );
            return Err(ToolError::Exit {
                program: command.program.clone(),
                code: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            return Err(ToolError::Stderr {
                program: command.program.clone(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
