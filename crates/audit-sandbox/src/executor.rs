//! Subprocess-backed `AgentExecutor` (§4.3, C1).
//!
//! Grounded on the teacher sandbox's `Sandbox::run` (plain
//! `Command::new(cmd).args(args).current_dir(root).output().await`), extended
//! with the timeout/terminate/kill sequence and artifact logging the teacher
//! version does not need.

use async_trait::async_trait;
use audit_core::agent::{AgentCallResult, AgentExecutor, AgentInvocation, AgentOutcome, SandboxMode};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Grace period between sending a terminate signal and force-killing (§4.3).
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Runs the external analysis agent as a subprocess, one invocation per call.
pub struct ProcessAgentExecutor {
    agent_cmd: String,
    agent_args: Vec<String>,
    logs_root: PathBuf,
}

impl ProcessAgentExecutor {
    pub fn new(agent_cmd: String, agent_args: Vec<String>, logs_root: PathBuf) -> Self {
        Self { agent_cmd, agent_args, logs_root }
    }

    fn artifact_dir(&self, invocation: &AgentInvocation, started_at_ms: i64) -> PathBuf {
        self.logs_root
            .join(format!("{}_{}_{}", invocation.stage, invocation.project_id, started_at_ms))
            .join(&invocation.scope)
    }

    async fn write_artifacts(dir: &std::path::Path, prompt: &str, stdout: &str, stderr: &str) -> io::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join("prompt"), prompt).await?;
        tokio::fs::write(dir.join("stdout"), stdout).await?;
        tokio::fs::write(dir.join("stderr"), stderr).await?;
        Ok(())
    }
}

#[async_trait]
impl AgentExecutor for ProcessAgentExecutor {
    async fn run(&self, invocation: AgentInvocation) -> AgentCallResult {
        if invocation.cancel.is_cancelled() {
            return AgentCallResult::Cancelled;
        }

        let started_at_ms = now_ms();
        let artifact_dir = self.artifact_dir(&invocation, started_at_ms);

        let mut command = Command::new(&self.agent_cmd);
        command
            .args(&self.agent_args)
            .current_dir(&invocation.workspace_root)
            .env("AUDIT_SANDBOX_MODE", sandbox_env_value(invocation.sandbox))
            .env("AUDIT_APPROVAL_POLICY", "never")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(err) => {
                return AgentCallResult::Err { message: format!("spawn failed: {err}"), captured: None };
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(invocation.prompt.as_bytes()).await {
                return AgentCallResult::Err {
                    message: format!("writing prompt to stdin: {err}"),
                    captured: None,
                };
            }
        }

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let wait_outcome = tokio::select! {
            res = child.wait() => WaitOutcome::Exited(res),
            _ = tokio::time::sleep(invocation.timeout) => WaitOutcome::TimedOut,
            _ = invocation.cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let (exit_code, timed_out, cancelled) = match wait_outcome {
            WaitOutcome::Exited(Ok(status)) => (status.code().unwrap_or(-1), false, false),
            WaitOutcome::Exited(Err(err)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let finished_at_ms = now_ms();
                let _ = Self::write_artifacts(&artifact_dir, &invocation.prompt, &stdout, &stderr).await;
                return AgentCallResult::Err {
                    message: format!("waiting on subprocess: {err}"),
                    captured: Some(AgentOutcome {
                        stdout,
                        stderr,
                        exit_code: -1,
                        started_at_ms,
                        finished_at_ms,
                        artifact_dir,
                    }),
                };
            }
            WaitOutcome::TimedOut => {
                terminate_then_kill(&mut child).await;
                (-1, true, false)
            }
            WaitOutcome::Cancelled => {
                // Signal the subprocess the same way a timeout does, but
                // report `Cancelled` rather than `Timeout` (§5 driver-level cancel).
                terminate_then_kill(&mut child).await;
                (-1, false, true)
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let finished_at_ms = now_ms();
        let _ = Self::write_artifacts(&artifact_dir, &invocation.prompt, &stdout, &stderr).await;

        if cancelled {
            return AgentCallResult::Cancelled;
        }

        let outcome = AgentOutcome { stdout, stderr, exit_code, started_at_ms, finished_at_ms, artifact_dir };

        if timed_out {
            return AgentCallResult::Timeout { partial: outcome };
        }
        if exit_code != 0 {
            return AgentCallResult::Err {
                message: format!("agent exited with status {exit_code}"),
                captured: Some(outcome),
            };
        }
        AgentCallResult::Ok(outcome)
    }
}

enum WaitOutcome {
    Exited(io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

fn sandbox_env_value(mode: SandboxMode) -> &'static str {
    match mode {
        SandboxMode::ReadOnly => "read-only",
        SandboxMode::WorkspaceWrite => "workspace-write",
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sends a terminate signal, waits a short grace period, then force-kills if
/// the process has not exited (§4.3: "exactly one subprocess per call ...
/// reaped before return, no zombies").
async fn terminate_then_kill(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::agent::AgentInvocation;
    use std::time::Duration as StdDuration;
    use tokio_util::sync::CancellationToken;

    fn invocation(workspace_root: PathBuf, timeout: StdDuration) -> AgentInvocation {
        AgentInvocation {
            workspace_root,
            prompt: "hello".to_string(),
            sandbox: SandboxMode::ReadOnly,
            timeout,
            stage: "reason".to_string(),
            project_id: "p1".to_string(),
            scope: "task-1-reasoner".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn captures_stdout_of_a_successful_command() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let executor =
            ProcessAgentExecutor::new("sh".to_string(), vec!["-c".to_string(), "cat".to_string()], logs.path().to_path_buf());

        let result = executor.run(invocation(tmp.path().to_path_buf(), StdDuration::from_secs(5))).await;
        match result {
            AgentCallResult::Ok(outcome) => assert_eq!(outcome.stdout, "hello"),
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_command_exceeding_its_deadline_is_reported_as_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let executor = ProcessAgentExecutor::new(
            "sh".to_string(),
            vec!["-c".to_string(), "sleep 30".to_string()],
            logs.path().to_path_buf(),
        );

        let result = executor.run(invocation(tmp.path().to_path_buf(), StdDuration::from_millis(200))).await;
        assert!(matches!(result, AgentCallResult::Timeout { .. }));
    }

    /// §5: a driver-level cancel signals the running subprocess instead of
    /// waiting out the full timeout.
    #[tokio::test]
    async fn a_cancelled_token_reports_cancelled_and_kills_the_subprocess() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let executor = ProcessAgentExecutor::new(
            "sh".to_string(),
            vec!["-c".to_string(), "sleep 30".to_string()],
            logs.path().to_path_buf(),
        );

        let mut invocation = invocation(tmp.path().to_path_buf(), StdDuration::from_secs(30));
        let cancel = CancellationToken::new();
        invocation.cancel = cancel.clone();
        cancel.cancel();

        let result = executor.run(invocation).await;
        assert!(matches!(result, AgentCallResult::Cancelled));
    }

    #[tokio::test]
    async fn a_nonzero_exit_is_reported_as_err_with_captured_output() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tempfile::tempdir().unwrap();
        let executor = ProcessAgentExecutor::new(
            "sh".to_string(),
            vec!["-c".to_string(), "echo oops 1>&2; exit 7".to_string()],
            logs.path().to_path_buf(),
        );

        let result = executor.run(invocation(tmp.path().to_path_buf(), StdDuration::from_secs(5))).await;
        match result {
            AgentCallResult::Err { captured: Some(outcome), .. } => {
                assert_eq!(outcome.exit_code, 7);
                assert!(outcome.stderr.contains("oops"));
            }
            other => panic!("expected Err with captured output, got {other:?}"),
        }
    }
}
