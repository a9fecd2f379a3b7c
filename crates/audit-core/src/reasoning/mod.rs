//! ReasoningLoop (§4.5, C5): per-Task bounded Reasoner/Watcher/Ideator loop,
//! idempotent SPLIT into Finding rows.

mod prompts;
mod schema;

use crate::agent::{AgentCallResult, AgentExecutor, AgentInvocation, SandboxMode};
use crate::error::{AuditError, Result};
use crate::model::{finding::wrap_single_vulnerability, FindingDraft, ShortResult, Task};
use crate::store::Store;
use crate::PipelineConfig;
use schema::{parse_json_object, IdeatorOutput, ReasonerOutput, WatcherDecision, WatcherOutput};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What `ReasoningLoop::run` actually did for one Task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningOutcome {
    /// `short_result` was already `split_done`; no work performed (§4.5 resume).
    AlreadyDone,
    /// Reasoning ran to completion and SPLIT succeeded.
    Completed { rounds_run: usize, finding_count: usize },
    /// Every round produced unparseable JSON; raw text recorded, split deferred.
    NeverParsed { rounds_run: usize },
    /// `result` existed but SPLIT failed; `short_result` set to `split_failed`.
    SplitFailed,
}

pub struct ReasoningLoop<'a> {
    executor: &'a dyn AgentExecutor,
    store: &'a dyn Store,
    config: &'a PipelineConfig,
    cancel: CancellationToken,
}

impl<'a> ReasoningLoop<'a> {
    pub fn new(
        executor: &'a dyn AgentExecutor,
        store: &'a dyn Store,
        config: &'a PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { executor, store, config, cancel }
    }

    pub async fn run(&self, task_id: i64, workspace_root: &Path) -> Result<ReasoningOutcome> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| AuditError::NotFound(format!("task {task_id}")))?;

        if task.short_result == ShortResult::SplitDone {
            return Ok(ReasoningOutcome::AlreadyDone);
        }

        if !task.result.is_empty() {
            // `result` was already written by a prior run. Distinguish a
            // crash mid-split (result holds valid aggregated JSON, SPLIT
            // just never flipped short_result) from a prior all-malformed
            // reasoning run (result holds raw non-JSON text): only the
            // former skips straight to SPLIT (§4.5 resume semantics); the
            // latter re-attempts REASON from scratch (§8 boundary behavior).
            if serde_json::from_str::<ReasonerOutput>(&task.result).is_ok() {
                return self.split(&task);
            }
        }

        self.reason_then_split(&task, workspace_root).await
    }

    async fn reason_then_split(&self, task: &Task, workspace_root: &Path) -> Result<ReasoningOutcome> {
        let init = self.call_role(task, workspace_root, "watcher_init", prompts::watcher_init_prompt(task)).await?;
        let watcher_init: WatcherOutput = parse_json_object(&init).unwrap_or(WatcherOutput {
            decision: WatcherDecision::Continue,
            reason: "defaulted after watcher-init parse failure".to_string(),
            budget_next: schema::WatcherBudget {
                max_more_rounds: Some(self.config.reasoning_max_rounds),
                time_limit_sec: Some(self.config.agent_timeout_sec),
                no_progress_rounds: Some(0),
            },
            watcher_instruction: String::new(),
        });

        let mut rounds_remaining = watcher_init
            .budget_next
            .max_more_rounds
            .unwrap_or(self.config.reasoning_max_rounds)
            .min(self.config.reasoning_max_rounds)
            .max(1);
        let mut watcher_instruction = watcher_init.watcher_instruction;
        let mut no_progress_rounds = 0usize;

        let mut seen_descriptions: HashSet<String> = HashSet::new();
        let mut ordered_descriptions: Vec<String> = Vec::new();
        let mut any_valid_round = false;
        let mut last_raw_output = String::new();
        let mut round_traces: Vec<RoundTraceRecord> = Vec::new();
        let mut round = 0usize;

        loop {
            round += 1;
            let reasoner_raw = self
                .call_role(task, workspace_root, "reasoner", prompts::reasoner_prompt(task, &watcher_instruction))
                .await?;
            last_raw_output = reasoner_raw.clone();

            let mut new_this_round = Vec::new();
            if let Some(parsed) = parse_json_object::<ReasonerOutput>(&reasoner_raw) {
                any_valid_round = true;
                for vuln in parsed.vulnerabilities {
                    if seen_descriptions.insert(vuln.description.clone()) {
                        ordered_descriptions.push(vuln.description.clone());
                        new_this_round.push(vuln.description);
                    }
                }
            }

            if new_this_round.is_empty() {
                no_progress_rounds += 1;
            } else {
                no_progress_rounds = 0;
            }
            rounds_remaining = rounds_remaining.saturating_sub(1);

            let eval_raw = self
                .call_role(
                    task,
                    workspace_root,
                    "watcher_eval",
                    prompts::watcher_eval_prompt(task, round, &new_this_round, no_progress_rounds, rounds_remaining),
                )
                .await?;
            let watcher: WatcherOutput = parse_json_object(&eval_raw).unwrap_or(WatcherOutput {
                decision: WatcherDecision::Stop,
                reason: "defaulted after watcher-eval parse failure".to_string(),
                budget_next: schema::WatcherBudget::default(),
                watcher_instruction: watcher_instruction.clone(),
            });

            if let Some(next) = watcher.budget_next.max_more_rounds {
                rounds_remaining = rounds_remaining.min(next);
            }

            let mut ideator_invoked = false;
            let decision = watcher.decision;
            if decision == WatcherDecision::Pivot {
                ideator_invoked = true;
                let ideator_raw = self
                    .call_role(
                        task,
                        workspace_root,
                        "ideator",
                        prompts::ideator_prompt(&watcher.watcher_instruction, &ordered_descriptions, rounds_remaining),
                    )
                    .await?;
                let ideator: IdeatorOutput = parse_json_object(&ideator_raw).unwrap_or_default();
                watcher_instruction = merge_ideator_instruction(&watcher.watcher_instruction, &ideator);
            } else {
                watcher_instruction = watcher.watcher_instruction.clone();
            }

            round_traces.push(RoundTraceRecord {
                round,
                new_finding_count: new_this_round.len(),
                watcher_decision: decision_str(decision).to_string(),
                watcher_reason: watcher.reason.clone(),
                ideator_invoked,
            });

            self.store
                .update_task_scan_record(task.id, &serde_json::to_string(&ScanRecord {
                    schema_version: "reasoning_trace_v1",
                    task_id: task.id,
                    task_uuid: task.uuid.to_string(),
                    rounds: round_traces.clone(),
                })?)?;

            let budget_exhausted = rounds_remaining == 0;
            let stop_now = match decision {
                WatcherDecision::Stop => true,
                WatcherDecision::Continue | WatcherDecision::Pivot => budget_exhausted,
            };
            if stop_now {
                break;
            }
        }

        if !any_valid_round {
            // §8 boundary behavior: malformed-only reasoning leaves result as
            // raw text and short_result empty so the next run re-attempts.
            self.store.update_task_result(task.id, &last_raw_output)?;
            return Ok(ReasoningOutcome::NeverParsed { rounds_run: round });
        }

        let aggregated = serde_json::json!({
            "schema_version": "1.0",
            "vulnerabilities": ordered_descriptions
                .iter()
                .map(|d| serde_json::json!({"description": d}))
                .collect::<Vec<_>>(),
        });
        self.store.update_task_result(task.id, &aggregated.to_string())?;

        let mut refreshed = task.clone();
        refreshed.result = aggregated.to_string();
        self.split(&refreshed).map(|outcome| match outcome {
            ReasoningOutcome::Completed { finding_count, .. } => {
                ReasoningOutcome::Completed { rounds_run: round, finding_count }
            }
            other => other,
        })
    }

    /// SPLIT (§4.5 step 3, §4.7): idempotent delete-then-insert of Findings
    /// from `task.result.vulnerabilities`.
    fn split(&self, task: &Task) -> Result<ReasoningOutcome> {
        let parsed: ReasonerOutput = match serde_json::from_str(&task.result) {
            Ok(p) => p,
            Err(_) => {
                self.store.set_task_short_result(task.id, ShortResult::SplitFailed)?;
                return Ok(ReasoningOutcome::SplitFailed);
            }
        };

        let drafts: Vec<FindingDraft> = parsed
            .vulnerabilities
            .into_iter()
            .map(|vuln| FindingDraft {
                project_id: task.project_id.clone(),
                task_id: task.id,
                task_uuid: task.uuid,
                rule_key: task.rule_key.clone(),
                finding_json: wrap_single_vulnerability(serde_json::json!({"description": vuln.description})),
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
            })
            .collect();
        let finding_count = drafts.len();

        match self.store.replace_task_findings(task.id, drafts) {
            Ok(_) => {
                self.store.set_task_short_result(task.id, ShortResult::SplitDone)?;
                Ok(ReasoningOutcome::Completed { rounds_run: 0, finding_count })
            }
            Err(err) => {
                self.store.set_task_short_result(task.id, ShortResult::SplitFailed)?;
                Err(err)
            }
        }
    }

    async fn call_role(
        &self,
        task: &Task,
        workspace_root: &Path,
        role: &str,
        prompt: String,
    ) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(AuditError::Cancel);
        }
        let invocation = AgentInvocation {
            workspace_root: workspace_root.to_path_buf(),
            prompt,
            sandbox: if self.config.enable_poc_execution {
                SandboxMode::WorkspaceWrite
            } else {
                SandboxMode::ReadOnly
            },
            timeout: Duration::from_secs(self.config.agent_timeout_sec),
            stage: "reason".to_string(),
            project_id: task.project_id.clone(),
            scope: format!("task-{}-{}", task.id, role),
            cancel: self.cancel.clone(),
        };
        match self.executor.run(invocation).await {
            AgentCallResult::Ok(outcome) => Ok(outcome.stdout),
            // A per-round agent failure is recorded as a zero-vulnerability
            // round rather than aborting the whole Task (§7 propagation policy).
            AgentCallResult::Timeout { partial } => Ok(partial.stdout),
            AgentCallResult::Err { captured, .. } => Ok(captured.map(|o| o.stdout).unwrap_or_default()),
            // Driver-level cancel aborts the Task outright, unlike a per-round
            // agent failure (§5).
            AgentCallResult::Cancelled => Err(AuditError::Cancel),
        }
    }
}

fn merge_ideator_instruction(current: &str, ideator: &IdeatorOutput) -> String {
    if ideator.new_hypotheses.is_empty() && ideator.suggested_probes.is_empty() {
        return current.to_string();
    }
    format!(
        "{current}\nPIVOT HYPOTHESES: {hyps}\nPROBES: {probes}",
        current = current,
        hyps = ideator.new_hypotheses.join("; "),
        probes = ideator.suggested_probes.join("; "),
    )
}

fn decision_str(decision: WatcherDecision) -> &'static str {
    match decision {
        WatcherDecision::Continue => "continue",
        WatcherDecision::Pivot => "pivot",
        WatcherDecision::Stop => "stop",
    }
}

#[derive(Debug, Clone, Serialize)]
struct RoundTraceRecord {
    round: usize,
    new_finding_count: usize,
    watcher_decision: String,
    watcher_reason: String,
    ideator_invoked: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ScanRecord {
    schema_version: &'static str,
    task_id: i64,
    task_uuid: String,
    rounds: Vec<RoundTraceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTask;
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct ScriptedExecutor {
        responses: Mutex<std::collections::VecDeque<String>>,
    }

    #[async_trait]
    impl AgentExecutor for ScriptedExecutor {
        async fn run(&self, invocation: AgentInvocation) -> AgentCallResult {
            let stdout = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| r#"{"decision":"stop","reason":"budget","budget_next":{},"watcher_instruction":""}"#.to_string());
            AgentCallResult::Ok(crate::agent::AgentOutcome {
                stdout,
                stderr: String::new(),
                exit_code: 0,
                started_at_ms: 0,
                finished_at_ms: 0,
                artifact_dir: invocation.workspace_root.join("logs"),
            })
        }
    }

    fn base_task(project_id: &str) -> NewTask {
        NewTask {
            project_id: project_id.to_string(),
            name: "Fi:F0 trade [reentrancy]".to_string(),
            content: "trade flow".to_string(),
            rule: serde_json::json!({"flow_id": "F0"}),
            rule_key: "reentrancy".to_string(),
            contract_code: "contract Trade {}".to_string(),
            start_line: 1,
            end_line: 5,
            relative_file_path: "Trade.sol".to_string(),
            absolute_file_path: "/data/p1/Trade.sol".to_string(),
            business_flow_code: "function trade() {}".to_string(),
            group: "F0".to_string(),
        }
    }

    #[tokio::test]
    async fn zero_finding_round_splits_to_done_with_no_findings() {
        use crate::store::Store;
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.insert_task(base_task("p1")).unwrap();
        let executor = ScriptedExecutor {
            responses: Mutex::new(
                vec![
                    r#"{"decision":"continue","reason":"init","budget_next":{"max_more_rounds":3},"watcher_instruction":"look for reentrancy"}"#.to_string(),
                    r#"{"schema_version":"1.0","vulnerabilities":[]}"#.to_string(),
                    r#"{"decision":"stop","reason":"no pending hypotheses","budget_next":{},"watcher_instruction":""}"#.to_string(),
                ]
                .into(),
            ),
        };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let loop_ = ReasoningLoop::new(&executor, &store, &config, CancellationToken::new());

        let outcome = loop_.run(task.id, Path::new("/data/p1")).await.unwrap();
        match outcome {
            ReasoningOutcome::Completed { finding_count, .. } => assert_eq!(finding_count, 0),
            other => panic!("expected Completed, got {:?}", other),
        }
        let refreshed = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(refreshed.short_result, ShortResult::SplitDone);
        assert!(store.list_findings_for_task(task.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn interrupted_split_is_idempotent_on_rerun() {
        use crate::store::Store;
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.insert_task(base_task("p1")).unwrap();
        let executor = ScriptedExecutor {
            responses: Mutex::new(
                vec![
                    r#"{"decision":"continue","reason":"init","budget_next":{"max_more_rounds":2},"watcher_instruction":"go"}"#.to_string(),
                    r#"{"schema_version":"1.0","vulnerabilities":[{"description":"D1"},{"description":"D2"}]}"#.to_string(),
                    r#"{"decision":"stop","reason":"budget","budget_next":{},"watcher_instruction":""}"#.to_string(),
                ]
                .into(),
            ),
        };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let loop_ = ReasoningLoop::new(&executor, &store, &config, CancellationToken::new());
        loop_.run(task.id, Path::new("/data/p1")).await.unwrap();

        let first_findings = store.list_findings_for_task(task.id).unwrap();
        assert_eq!(first_findings.len(), 2);

        // Simulate a crash right after `result` was written but before the
        // short_result flag landed: re-running must reproduce the same set.
        store.set_task_short_result(task.id, ShortResult::Empty).unwrap();
        let second_executor = ScriptedExecutor { responses: Mutex::new(Default::default()) };
        let loop_2 = ReasoningLoop::new(&second_executor, &store, &config, CancellationToken::new());
        let outcome = loop_2.run(task.id, Path::new("/data/p1")).await.unwrap();
        match outcome {
            ReasoningOutcome::Completed { finding_count, .. } => assert_eq!(finding_count, 2),
            other => panic!("expected Completed, got {:?}", other),
        }
        let second_findings = store.list_findings_for_task(task.id).unwrap();
        assert_eq!(second_findings.len(), 2);
    }

    #[tokio::test]
    async fn already_split_done_task_is_a_noop() {
        use crate::store::Store;
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.insert_task(base_task("p1")).unwrap();
        store.update_task_result(task.id, r#"{"schema_version":"1.0","vulnerabilities":[]}"#).unwrap();
        store.set_task_short_result(task.id, ShortResult::SplitDone).unwrap();

        let executor = ScriptedExecutor { responses: Mutex::new(Default::default()) };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let loop_ = ReasoningLoop::new(&executor, &store, &config, CancellationToken::new());
        let outcome = loop_.run(task.id, Path::new("/data/p1")).await.unwrap();
        assert_eq!(outcome, ReasoningOutcome::AlreadyDone);
    }

    /// §8 boundary behavior: a task left with raw non-JSON `result` from a
    /// prior all-malformed reasoning run re-attempts REASON on resume,
    /// rather than forever failing SPLIT on text that was never JSON.
    #[tokio::test]
    async fn never_parsed_result_retries_reasoning_on_resume() {
        use crate::store::Store;
        let store = SqliteStore::open_in_memory().unwrap();
        let task = store.insert_task(base_task("p1")).unwrap();
        store.update_task_result(task.id, "not json, chatter from a bad round").unwrap();

        let executor = ScriptedExecutor {
            responses: Mutex::new(
                vec![
                    r#"{"decision":"continue","reason":"init","budget_next":{"max_more_rounds":1},"watcher_instruction":"retry"}"#.to_string(),
                    r#"{"schema_version":"1.0","vulnerabilities":[{"description":"D1"}]}"#.to_string(),
                    r#"{"decision":"stop","reason":"budget","budget_next":{},"watcher_instruction":""}"#.to_string(),
                ]
                .into(),
            ),
        };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let loop_ = ReasoningLoop::new(&executor, &store, &config, CancellationToken::new());

        let outcome = loop_.run(task.id, Path::new("/data/p1")).await.unwrap();
        match outcome {
            ReasoningOutcome::Completed { finding_count, .. } => assert_eq!(finding_count, 1),
            other => panic!("expected Completed, got {:?}", other),
        }
        let refreshed = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(refreshed.short_result, ShortResult::SplitDone);
    }
}
