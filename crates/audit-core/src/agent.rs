//! AgentExecutor contract (§4.3, C1).
//!
//! The concrete subprocess-backed implementation (`ProcessAgentExecutor`)
//! lives in `audit-sandbox`; this crate depends only on the trait so
//! `PlanningEngine`/`ReasoningLoop`/`Validator` stay agnostic of how the
//! external agent CLI is actually invoked. Mirrors the DESIGN NOTES §9
//! guidance to return explicit result variants instead of driving control
//! flow through exceptions.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sandbox policy for one AgentExecutor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxMode {
    /// The agent may only read the workspace.
    ReadOnly,
    /// The agent may write inside the workspace (PoC execution only).
    WorkspaceWrite,
}

/// A single request to run the external analysis agent.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub workspace_root: PathBuf,
    pub prompt: String,
    pub sandbox: SandboxMode,
    pub timeout: Duration,
    /// Directory scope used to build the artifact log path:
    /// `logs/<stage>_<project_id>_<ts>/<scope>/`.
    pub stage: String,
    pub project_id: String,
    pub scope: String,
    /// Driver-level cancellation (§5): checked by the executor before
    /// spawning, and raced against the running subprocess so a cancel
    /// signals it immediately instead of waiting out the full timeout.
    pub cancel: CancellationToken,
}

/// Successful completion of one AgentExecutor call.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub started_at_ms: i64,
    pub finished_at_ms: i64,
    pub artifact_dir: PathBuf,
}

/// Result of one AgentExecutor call — explicit variants per DESIGN NOTES §9,
/// never an exception-driven `Result<AgentOutcome, AuditError>` that loses
/// the partial-capture-on-timeout case.
#[derive(Debug, Clone)]
pub enum AgentCallResult {
    Ok(AgentOutcome),
    /// Deadline exceeded; `partial` holds whatever stdout/stderr was captured
    /// before the terminate→kill sequence completed.
    Timeout { partial: AgentOutcome },
    /// Non-zero exit or I/O failure; `captured` holds whatever streams were read.
    Err { message: String, captured: Option<AgentOutcome> },
    /// `invocation.cancel` fired before or during the call; no subprocess
    /// outcome to report (§5 driver-level cancel).
    Cancelled,
}

/// Launches the external analysis agent as a sandboxed subprocess (C1).
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Run the agent once. Guarantees (§4.3):
    /// - working directory fixed to `invocation.workspace_root`, no other roots added
    /// - `approval=never` is always enforced regardless of `sandbox`
    /// - prompt/stdout/stderr are written under the returned `artifact_dir`, never truncated
    /// - exactly one subprocess per call, reaped before returning
    async fn run(&self, invocation: AgentInvocation) -> AgentCallResult;
}

/// Validate that `workspace_root` is a prefix-descendant of `dataset_base`
/// (I6/P4), used by every caller before constructing an `AgentInvocation`.
pub fn assert_contained(workspace_root: &Path, dataset_base: &Path) -> bool {
    workspace_root.starts_with(dataset_base)
}
