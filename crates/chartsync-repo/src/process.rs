//! Bounded external process execution
//!
//! Every collaborator call goes through [`ProcessRunner`], which puts a hard
//! timeout on the child and kills it if the timeout fires. Secrets are only
//! ever passed on stdin, so the rendered command line is safe to log.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{RepoError, Result};

/// One external command invocation
#[derive(Debug, Clone, Default)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Feed `input` on stdin (used for `--password-stdin`)
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Command line for logs and error messages
    pub fn display(&self) -> String {
        let mut s = self.program.clone();
        for arg in &self.args {
            s.push(' ');
            s.push_str(arg);
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run to completion and return the output whatever the exit status
    pub async fn output(&self, cmd: &ToolCommand) -> Result<ProcessOutput> {
        let cmd_display = cmd.display();
        tracing::debug!(command = %cmd_display, "running");

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &cmd.envs {
            command.env(key, value);
        }
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RepoError::ToolMissing {
                tool: cmd.program.clone(),
            },
            _ => RepoError::Spawn {
                command: cmd_display.clone(),
                message: e.to_string(),
            },
        })?;

        if let (Some(input), Some(mut pipe)) = (&cmd.stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            drop(pipe);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RepoError::Timeout {
                command: cmd_display.clone(),
                seconds: self.timeout.as_secs(),
            })??;

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and fail on a non-zero exit; returns stdout
    pub async fn run(&self, cmd: &ToolCommand) -> Result<String> {
        let output = self.output(cmd).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(RepoError::CommandFailed {
                command: cmd.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

/// Check that every tool resolves on `PATH`
pub fn require_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        which::which(tool).map_err(|_| RepoError::ToolMissing {
            tool: tool.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = ProcessRunner::default();
        let out = runner
            .run(&ToolCommand::new("sh").args(["-c", "echo hello"]))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let runner = ProcessRunner::default();
        let out = runner
            .run(&ToolCommand::new("cat").stdin("secret"))
            .await
            .unwrap();
        assert_eq!(out, "secret");
    }

    #[tokio::test]
    async fn test_non_zero_exit() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&ToolCommand::new("sh").args(["-c", "echo nope >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            RepoError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = ProcessRunner::new(Duration::from_millis(100));
        let err = runner
            .run(&ToolCommand::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(&ToolCommand::new("chartsync-definitely-not-a-tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::ToolMissing { .. }));
        assert!(require_tools(&["chartsync-definitely-not-a-tool"]).is_err());
    }

    #[test]
    fn test_display_has_no_stdin() {
        let cmd = ToolCommand::new("crane")
            .args(["auth", "login", "r.example", "--password-stdin"])
            .stdin("hunter2");
        assert_eq!(cmd.display(), "crane auth login r.example --password-stdin");
    }
}
