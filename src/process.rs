//! Shell command execution shared by the builder and the rollout executors

use crate::error::{RollgateError, RollgateResult};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::debug;

/// Max number of output lines to include in failure messages.
const OUTPUT_TAIL_LINES: usize = 50;

/// Last `OUTPUT_TAIL_LINES` lines of combined output
pub(crate) fn output_tail(lines: &[String]) -> String {
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n")
}

/// A `sh -c` invocation with extra environment and a time bound
#[derive(Debug, Clone)]
pub(crate) struct ShellCommand {
    command: String,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    timeout: Duration,
}

/// Collected result of a finished command
#[derive(Debug, Clone)]
pub(crate) struct ShellOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub lines: Vec<String>,
}

impl ShellOutput {
    pub fn tail(&self) -> String {
        output_tail(&self.lines)
    }

    /// Exit status followed by the output tail
    pub fn failure_message(&self) -> String {
        let status = match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        if self.lines.is_empty() {
            status
        } else {
            format!("{}\n{}", status, self.tail())
        }
    }
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            env: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Run to completion, streaming each output line to `on_output`
    ///
    /// Returns `Ok` with `success == false` for a non-zero exit. A command
    /// that outlives its timeout is killed and reported as
    /// [`RollgateError::CommandExecution`].
    pub async fn run(&self, on_output: &(dyn Fn(String) + Send + Sync)) -> RollgateResult<ShellOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Terminal Ctrl-C goes to rollgate only; the command runs to completion
        #[cfg(unix)]
        cmd.process_group(0);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!("Running: sh -c {}", self.command);
        let mut child = cmd
            .spawn()
            .map_err(|e| RollgateError::command_failed(&self.command, e))?;

        let run = async {
            let lines = stream_child_output(&mut child, on_output).await;
            let status = child.wait().await;
            (lines, status)
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok((lines, Ok(status))) => Ok(ShellOutput {
                success: status.success(),
                exit_code: status.code(),
                lines,
            }),
            Ok((_, Err(e))) => Err(RollgateError::command_failed(&self.command, e)),
            Err(_) => Err(RollgateError::command_exec(
                &self.command,
                format!("timed out after {}s", self.timeout.as_secs()),
            )),
        }
    }
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
async fn stream_child_output(
    child: &mut Child,
    on_output: &(dyn Fn(String) + Send + Sync),
) -> Vec<String> {
    let mut all_output = Vec::new();
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return all_output;
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(line.clone());
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    all_output
}
