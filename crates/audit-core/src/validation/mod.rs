//! Validator (§4.6, C6): evidence-based re-confirmation of each pending
//! Finding, with a structured audit trail.

mod prompts;
mod schema;

use crate::agent::{AgentCallResult, AgentExecutor, AgentInvocation, AgentOutcome, SandboxMode};
use crate::error::Result;
use crate::model::{Finding, ValidationStatus};
use crate::store::Store;
use crate::PipelineConfig;
use futures::stream::{FuturesUnordered, StreamExt};
use schema::parse_validation_response;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Outcome of validating every pending Finding for one project.
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    pub validated: usize,
    pub errors: usize,
}

pub struct Validator<'a> {
    executor: &'a dyn AgentExecutor,
    store: &'a dyn Store,
    config: &'a PipelineConfig,
}

impl<'a> Validator<'a> {
    pub fn new(executor: &'a dyn AgentExecutor, store: &'a dyn Store, config: &'a PipelineConfig) -> Self {
        Self { executor, store, config }
    }

    /// Validate every Finding selected by §4.6 for `project_id`, bounded to
    /// `config.max_validation_parallel` concurrent AgentExecutor calls. `cancel`
    /// is checked before each permit is acquired so a driver-level cancel stops
    /// queued work from starting (§4.6, §5).
    pub async fn run_for_project(
        &self,
        project_id: &str,
        workspace_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<ValidationSummary> {
        let pending = self.store.list_findings_for_validation(project_id)?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_validation_parallel.max(1)));

        let mut in_flight = FuturesUnordered::new();
        for finding in pending {
            let permit = semaphore.clone();
            let cancel = cancel.clone();
            in_flight.push(async move {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                if cancel.is_cancelled() {
                    return Ok(());
                }
                self.validate_one(&finding, workspace_root, &cancel).await
            });
        }

        let mut summary = ValidationSummary::default();
        while let Some(result) = in_flight.next().await {
            match result {
                Ok(()) => summary.validated += 1,
                Err(_) => summary.errors += 1,
            }
        }
        Ok(summary)
    }

    /// Validate a Finding already known to be final (idempotent no-op) or
    /// pending. Re-running on a final Finding costs nothing (§8 round-trip property).
    /// A `cancel` fired before the call leaves the Finding's status untouched so a
    /// future run retries it, rather than recording it as `error` (§5).
    pub async fn validate_one(&self, finding: &Finding, workspace_root: &Path, cancel: &CancellationToken) -> Result<()> {
        if finding.validation_status.is_final() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let prompt = prompts::validation_prompt(finding);
        let prompt_hash = blake3::hash(prompt.as_bytes()).to_hex().to_string();

        let invocation = AgentInvocation {
            workspace_root: workspace_root.to_path_buf(),
            prompt,
            sandbox: SandboxMode::ReadOnly,
            timeout: Duration::from_secs(self.config.agent_timeout_sec),
            stage: "validate".to_string(),
            project_id: finding.project_id.clone(),
            scope: format!("finding-{}", finding.id),
            cancel: cancel.clone(),
        };

        let (status, record) = match self.executor.run(invocation).await {
            AgentCallResult::Ok(outcome) => self.interpret(finding, workspace_root, &outcome, "ok", &prompt_hash),
            AgentCallResult::Timeout { partial } => {
                self.interpret(finding, workspace_root, &partial, "timeout", &prompt_hash)
            }
            AgentCallResult::Cancelled => return Ok(()),
            AgentCallResult::Err { message, captured } => {
                let outcome = captured.unwrap_or(AgentOutcome {
                    stdout: String::new(),
                    stderr: message,
                    exit_code: -1,
                    started_at_ms: 0,
                    finished_at_ms: 0,
                    artifact_dir: workspace_root.join("logs"),
                });
                self.interpret(finding, workspace_root, &outcome, "error", &prompt_hash)
            }
        };

        self.store.update_finding_validation(finding.id, status, &record)?;
        Ok(())
    }

    fn interpret(
        &self,
        finding: &Finding,
        workspace_root: &Path,
        outcome: &AgentOutcome,
        exit_mode: &str,
        prompt_hash: &str,
    ) -> (ValidationStatus, serde_json::Value) {
        let (status, parsed_json) = if exit_mode == "ok" {
            match parse_validation_response(&outcome.stdout) {
                Some(parsed) => (
                    parsed.status,
                    serde_json::to_value(&parsed).unwrap_or(serde_json::Value::Null),
                ),
                // Parse failure maps to `not_sure` (§7 propagation policy).
                None => (ValidationStatus::NotSure, serde_json::Value::Null),
            }
        } else {
            // Timeout or infrastructure failure maps to `error` with a full record (§7).
            (ValidationStatus::Error, serde_json::Value::Null)
        };

        let record = serde_json::json!({
            "raw_final_text": outcome.stdout,
            "parsed": parsed_json,
            "workspace_root": workspace_root.to_string_lossy(),
            "started_at_ms": outcome.started_at_ms,
            "finished_at_ms": outcome.finished_at_ms,
            "prompt_hash": prompt_hash,
            "exit_mode": exit_mode,
            "finding_id": finding.id,
        });

        (status, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FindingDraft, NewTask};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct FixedExecutor {
        body: String,
    }

    #[async_trait]
    impl AgentExecutor for FixedExecutor {
        async fn run(&self, invocation: AgentInvocation) -> AgentCallResult {
            AgentCallResult::Ok(AgentOutcome {
                stdout: self.body.clone(),
                stderr: String::new(),
                exit_code: 0,
                started_at_ms: 1,
                finished_at_ms: 2,
                artifact_dir: invocation.workspace_root.join("logs"),
            })
        }
    }

    struct TimeoutExecutor;

    #[async_trait]
    impl AgentExecutor for TimeoutExecutor {
        async fn run(&self, invocation: AgentInvocation) -> AgentCallResult {
            AgentCallResult::Timeout {
                partial: AgentOutcome {
                    stdout: "partial reasoning before deadline".to_string(),
                    stderr: String::new(),
                    exit_code: -1,
                    started_at_ms: 1,
                    finished_at_ms: 9_001,
                    artifact_dir: invocation.workspace_root.join("logs"),
                },
            }
        }
    }

    fn seed_finding(store: &SqliteStore) -> Finding {
        use crate::store::Store;
        let task = store
            .insert_task(NewTask {
                project_id: "p1".to_string(),
                name: "Fi:F0 x [reentrancy]".to_string(),
                content: String::new(),
                rule: serde_json::json!({}),
                rule_key: "reentrancy".to_string(),
                contract_code: String::new(),
                start_line: 1,
                end_line: 2,
                relative_file_path: "A.sol".to_string(),
                absolute_file_path: "/data/p1/A.sol".to_string(),
                business_flow_code: "function f() {}".to_string(),
                group: "F0".to_string(),
            })
            .unwrap();
        let drafts = vec![FindingDraft {
            project_id: "p1".to_string(),
            task_id: task.id,
            task_uuid: task.uuid,
            rule_key: "reentrancy".to_string(),
            finding_json: crate::model::finding::wrap_single_vulnerability(serde_json::json!({"description": "D1"})),
            task_name: task.name.clone(),
            task_content: task.content.clone(),
            task_business_flow_code: task.business_flow_code.clone(),
            task_contract_code: task.contract_code.clone(),
            task_start_line: task.start_line,
            task_end_line: task.end_line,
            task_relative_file_path: task.relative_file_path.clone(),
            task_absolute_file_path: task.absolute_file_path.clone(),
            task_rule: task.rule.clone(),
            task_group: task.group.clone(),
        }];
        store.replace_task_findings(task.id, drafts).unwrap().remove(0)
    }

    #[tokio::test]
    async fn maps_intended_design_status_and_records_raw_text() {
        let store = SqliteStore::open_in_memory().unwrap();
        let finding = seed_finding(&store);
        let body = r#"{"schema_version":"validation_codex_v1","status":"intended_design","confidence":"high","exists":true,"classification":"design","impact":"low","exploit_difficulty":"hard","reason":"by design","evidence":[],"doc_references":[],"attack_preconditions":[],"attack_path":"","mitigation":"","unknowns":[]}"#;
        let executor = FixedExecutor { body: body.to_string() };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let validator = Validator::new(&executor, &store, &config);

        validator
            .validate_one(&finding, Path::new("/data/p1"), &CancellationToken::new())
            .await
            .unwrap();

        use crate::store::Store;
        let refreshed = store.list_findings_for_task(finding.task_id).unwrap().remove(0);
        assert_eq!(refreshed.validation_status, ValidationStatus::IntendedDesign);
        let record = refreshed.validation_record.unwrap();
        assert_eq!(record["raw_final_text"], body);
        assert_eq!(record["parsed"]["status"], "intended_design");
    }

    #[tokio::test]
    async fn revalidating_a_final_finding_is_a_noop() {
        let store = SqliteStore::open_in_memory().unwrap();
        let finding = seed_finding(&store);
        use crate::store::Store;
        store
            .update_finding_validation(finding.id, ValidationStatus::FalsePositive, &serde_json::json!({}))
            .unwrap();
        let refreshed = store.list_findings_for_task(finding.task_id).unwrap().remove(0);

        let executor = FixedExecutor { body: "should not be called".to_string() };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let validator = Validator::new(&executor, &store, &config);
        validator
            .validate_one(&refreshed, Path::new("/data/p1"), &CancellationToken::new())
            .await
            .unwrap();

        let after = store.list_findings_for_task(finding.task_id).unwrap().remove(0);
        assert_eq!(after.validation_status, ValidationStatus::FalsePositive);
    }

    /// §8 S6: an agent call that times out during validation maps to
    /// `validation_status = error` with `exit_mode = "timeout"` in the record,
    /// never leaves the Finding `pending`.
    #[tokio::test]
    async fn agent_timeout_during_validation_maps_to_error_status() {
        let store = SqliteStore::open_in_memory().unwrap();
        let finding = seed_finding(&store);
        let executor = TimeoutExecutor;
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let validator = Validator::new(&executor, &store, &config);

        validator
            .validate_one(&finding, Path::new("/data/p1"), &CancellationToken::new())
            .await
            .unwrap();

        use crate::store::Store;
        let refreshed = store.list_findings_for_task(finding.task_id).unwrap().remove(0);
        assert_eq!(refreshed.validation_status, ValidationStatus::Error);
        let record = refreshed.validation_record.unwrap();
        assert_eq!(record["exit_mode"], "timeout");
        assert_eq!(record["raw_final_text"], "partial reasoning before deadline");
    }
}
