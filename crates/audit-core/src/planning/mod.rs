//! PlanningEngine (§4.4, C4): Phase A forward extraction, Phase B coverage
//! repair, and Task finalization.

mod prompts;
mod schema;

use crate::agent::{AgentCallResult, AgentExecutor, AgentInvocation, SandboxMode};
use crate::error::{AuditError, Result};
use crate::model::{Flow, FunctionCatalog, Group, IdAllocator, NewTask, Project, RefStatus, Task};
use crate::store::Store;
use crate::PipelineConfig;
use schema::{parse_planning_json, PlanningDocument};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of one `PlanningEngine::run` call.
#[derive(Debug, Clone)]
pub struct PlanningSummary {
    pub project_id: String,
    pub skipped: bool,
    pub coverage: f64,
    pub flow_count: usize,
    pub task_count: usize,
    pub partial: bool,
}

pub struct PlanningEngine<'a> {
    executor: &'a dyn AgentExecutor,
    store: &'a dyn Store,
    config: &'a PipelineConfig,
    cancel: CancellationToken,
}

impl<'a> PlanningEngine<'a> {
    pub fn new(
        executor: &'a dyn AgentExecutor,
        store: &'a dyn Store,
        config: &'a PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { executor, store, config, cancel }
    }

    /// Plan `project`, writing one Task per (Fi × rule_key). A no-op (repair
    /// skipped) if Tasks already exist for the project (§4.8 resume).
    pub async fn run(&self, project: &Project, catalog: &dyn FunctionCatalog) -> Result<PlanningSummary> {
        if self.store.tasks_exist_for_project(&project.project_id)? {
            return Ok(PlanningSummary {
                project_id: project.project_id.clone(),
                skipped: true,
                coverage: 0.0,
                flow_count: 0,
                task_count: 0,
                partial: false,
            });
        }

        let mut allocator = IdAllocator::new();
        let mut last_good: Option<PlanningDocument> = None;
        let mut partial = false;

        // --- Phase A: forward extraction (P0 -> P1 -> P2) ---
        let p0_out = self.call(project, "plan_p0", prompts::p0_prompt(catalog)).await?;
        let p1_out = self.call(project, "plan_p1", prompts::p1_prompt(catalog, &p0_out)).await?;

        let (doc, ok) = self.converge_json(project, "plan_p2", &p1_out, &mut last_good).await?;
        partial |= !ok;

        let mut groups: BTreeMap<String, Group> = BTreeMap::new();
        let mut flows: Vec<Flow> = Vec::new();
        self.merge_document(doc, &mut allocator, &mut groups, &mut flows);
        for flow in &mut flows {
            flow.resolve_against(catalog);
        }

        // --- Phase B: coverage repair (P3 -> P4 -> P5) ---
        let mut repair_round = 0usize;
        loop {
            let (covered, uncovered) = self.coverage_sets(catalog, &flows);
            let coverage = Self::coverage_ratio(&covered, catalog);
            if coverage >= self.config.coverage_target || repair_round >= self.config.max_repair_rounds {
                break;
            }
            if uncovered.is_empty() {
                break;
            }
            repair_round += 1;

            for batch in Self::partition_uncovered(&uncovered, catalog.len()) {
                let p3_out = self.call(project, "plan_p3", prompts::p3_prompt(&batch)).await?;
                let residual: Vec<String> = batch.clone();
                let p4_out = self
                    .call(project, "plan_p4", prompts::p4_prompt(&p3_out, &residual))
                    .await?;
                let (delta, ok) = self.converge_json(project, "plan_p5", &p4_out, &mut last_good).await?;
                partial |= !ok;
                self.merge_document(delta, &mut allocator, &mut groups, &mut flows);
                for flow in &mut flows {
                    flow.resolve_against(catalog);
                }
            }
        }

        // Final resolution pass and coverage figure (post-repair, §4.4).
        for flow in &mut flows {
            flow.resolve_against(catalog);
        }
        let (covered, _) = self.coverage_sets(catalog, &flows);
        let coverage = Self::coverage_ratio(&covered, catalog);

        // --- Finalize: one Task per (Fi, rule_key) ---
        let mut new_tasks = Vec::new();
        for flow in &flows {
            let bundle = self.assemble_business_flow_code(catalog, flow);
            let (start_line, end_line, relative_file_path, absolute_file_path, contract_code) =
                self.primary_file_context(catalog, flow);

            for rule_key in &self.config.rule_keys {
                let rule = serde_json::json!({
                    "flow_id": flow.flow_id,
                    "flow_name": flow.name,
                    "group_ids": flow.group_ids,
                    "function_refs": flow.matched_refs,
                    "missing_function_refs": flow.missing_refs,
                    "ambiguous_function_refs": flow.ambiguous_refs,
                    "planning_stage": "finalize",
                    "rule_key": rule_key,
                    "checklist_items": Vec::<serde_json::Value>::new(),
                });

                new_tasks.push(NewTask {
                    project_id: project.project_id.clone(),
                    name: Task::task_name(&flow.flow_id, &flow.name, rule_key),
                    content: format!("Business flow '{}' scanned for {}", flow.name, rule_key),
                    rule,
                    rule_key: rule_key.clone(),
                    contract_code: contract_code.clone(),
                    start_line,
                    end_line,
                    relative_file_path: relative_file_path.clone(),
                    absolute_file_path: absolute_file_path.clone(),
                    business_flow_code: bundle.clone(),
                    group: flow.flow_id.clone(),
                });
            }
        }

        let task_count = new_tasks.len();
        if !new_tasks.is_empty() {
            self.store.bulk_insert_tasks(new_tasks)?;
        }

        Ok(PlanningSummary {
            project_id: project.project_id.clone(),
            skipped: false,
            coverage,
            flow_count: flows.len(),
            task_count,
            partial,
        })
    }

    async fn call(&self, project: &Project, scope: &str, prompt: String) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(AuditError::Cancel);
        }
        let invocation = AgentInvocation {
            workspace_root: project.workspace_root.clone(),
            prompt,
            sandbox: SandboxMode::ReadOnly,
            timeout: Duration::from_secs(self.config.agent_timeout_sec),
            stage: "plan".to_string(),
            project_id: project.project_id.clone(),
            scope: scope.to_string(),
            cancel: self.cancel.clone(),
        };
        match self.executor.run(invocation).await {
            AgentCallResult::Ok(outcome) => Ok(outcome.stdout),
            AgentCallResult::Timeout { .. } => Err(AuditError::Timeout {
                elapsed_sec: self.config.agent_timeout_sec,
                limit_sec: self.config.agent_timeout_sec,
            }),
            AgentCallResult::Err { message, .. } => Err(AuditError::Exec(message)),
            AgentCallResult::Cancelled => Err(AuditError::Cancel),
        }
    }

    /// Converge `previous` into a `PlanningDocument`, retrying once with a
    /// stricter prompt on parse failure, then falling back to `last_good`
    /// (§4.4 Finalize failure semantics). Returns `(doc, fully_ok)`.
    async fn converge_json(
        &self,
        project: &Project,
        scope: &str,
        previous: &str,
        last_good: &mut Option<PlanningDocument>,
    ) -> Result<(PlanningDocument, bool)> {
        let converge_prompt = if scope == "plan_p5" {
            prompts::p5_prompt(previous, false)
        } else {
            prompts::p2_prompt(previous, false)
        };
        let first = self.call(project, scope, converge_prompt).await?;
        if let Ok(doc) = parse_planning_json(&first) {
            *last_good = Some(doc.clone());
            return Ok((doc, true));
        }

        let retry_prompt = if scope == "plan_p5" {
            prompts::p5_prompt(&first, true)
        } else {
            prompts::p2_prompt(&first, true)
        };
        let retry = self.call(project, scope, retry_prompt).await?;
        if let Ok(doc) = parse_planning_json(&retry) {
            *last_good = Some(doc.clone());
            return Ok((doc, true));
        }

        // Both attempts failed; fall back to the last successfully parsed
        // snapshot (possibly none on a first-run failure, in which case we
        // proceed with an empty delta and mark the run partial).
        Ok((last_good.clone().unwrap_or_default(), false))
    }

    fn merge_document(
        &self,
        doc: PlanningDocument,
        allocator: &mut IdAllocator,
        groups: &mut BTreeMap<String, Group>,
        flows: &mut Vec<Flow>,
    ) {
        for g in doc.groups {
            allocator.observe_group_id(&g.group_id);
            let id = if groups.contains_key(&g.group_id) {
                // Same ID reused with (possibly) different content: append-only
                // semantics require a fresh ID rather than silently overwriting (I5).
                allocator.next_group_id()
            } else {
                g.group_id.clone()
            };
            groups.insert(
                id.clone(),
                Group {
                    group_id: id,
                    name: g.group_name,
                    function_refs: g.functions,
                },
            );
        }

        let existing_flow_ids: HashSet<String> = flows.iter().map(|f| f.flow_id.clone()).collect();
        for f in doc.flows {
            allocator.observe_flow_id(&f.flow_id);
            let id = if existing_flow_ids.contains(&f.flow_id) {
                allocator.next_flow_id()
            } else {
                f.flow_id.clone()
            };
            flows.push(Flow::new(id, f.name, f.group_ids, f.function_refs));
        }
    }

    fn coverage_sets(&self, catalog: &dyn FunctionCatalog, flows: &[Flow]) -> (HashSet<String>, Vec<String>) {
        let mut covered = HashSet::new();
        for flow in flows {
            for r in &flow.matched_refs {
                covered.insert(r.clone());
            }
        }
        let uncovered: Vec<String> = catalog
            .list()
            .iter()
            .map(|e| e.canonical_ref())
            .filter(|r| !covered.contains(r))
            .collect();
        (covered, uncovered)
    }

    fn coverage_ratio(covered: &HashSet<String>, catalog: &dyn FunctionCatalog) -> f64 {
        if catalog.is_empty() {
            return 1.0;
        }
        covered.len() as f64 / catalog.len() as f64
    }

    /// Partition uncovered refs into batches of 150-400, grouped by file path
    /// so each batch stays contiguous in the source tree (§4.4 Phase B).
    fn partition_uncovered(uncovered: &[String], catalog_size: usize) -> Vec<Vec<String>> {
        let batch_size = if catalog_size < 150 {
            uncovered.len().max(1)
        } else {
            catalog_size.clamp(150, 400)
        };
        uncovered
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// Concatenate bodies of `flow.matched_refs` in ref order (I2).
    fn assemble_business_flow_code(&self, catalog: &dyn FunctionCatalog, flow: &Flow) -> String {
        flow.matched_refs
            .iter()
            .filter_map(|r| catalog.list().iter().find(|e| &e.canonical_ref() == r))
            .map(|e| e.body_text.clone())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn primary_file_context(
        &self,
        catalog: &dyn FunctionCatalog,
        flow: &Flow,
    ) -> (i64, i64, String, String, String) {
        let entries: Vec<_> = flow
            .matched_refs
            .iter()
            .filter_map(|r| catalog.list().iter().find(|e| &e.canonical_ref() == r))
            .collect();

        if entries.is_empty() {
            return (0, 0, String::new(), String::new(), String::new());
        }

        let start_line = entries.iter().map(|e| e.start_line).min().unwrap_or(0) as i64;
        let end_line = entries.iter().map(|e| e.end_line).max().unwrap_or(0) as i64;
        let primary = entries[0];
        let relative_file_path = primary.file_path.to_string_lossy().into_owned();
        let absolute_file_path = relative_file_path.clone();
        let contract_code = primary.body_text.clone();
        (start_line, end_line, relative_file_path, absolute_file_path, contract_code)
    }
}

/// Reclassify a Flow's refs against the catalog, exposed for callers that
/// need per-ref status without constructing a full PlanningEngine (tests,
/// diagnostics tooling).
pub fn classify_refs(flow: &Flow) -> Vec<(String, RefStatus)> {
    let mut out = Vec::new();
    for r in &flow.matched_refs {
        out.push((r.clone(), RefStatus::Matched));
    }
    for r in &flow.ambiguous_refs {
        out.push((r.clone(), RefStatus::Ambiguous));
    }
    for r in &flow.missing_refs {
        out.push((r.clone(), RefStatus::Missing));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FunctionEntry, InMemoryCatalog, Visibility};
    use crate::store::{SqliteStore, Store};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn entry(container: &str, name: &str, file: &str, line: u32, body: &str) -> FunctionEntry {
        FunctionEntry {
            container: container.to_string(),
            name: name.to_string(),
            signature: None,
            file_path: PathBuf::from(file),
            start_line: line,
            end_line: line + 3,
            visibility: Visibility::Public,
            body_text: body.to_string(),
        }
    }

    /// Scripted executor returning one canned response per call, in order.
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
                .unwrap_or_else(|| "{}".to_string());
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

    #[tokio::test]
    async fn plans_happy_path_with_coverage_repair() {
        let catalog = InMemoryCatalog::new(vec![
            entry("A", "f", "a.sol", 1, "function f() { trade(); }"),
            entry("A", "g", "a.sol", 10, "function g() { helper(); }"),
            entry("B", "h", "b.sol", 1, "function h() { withdraw(); }"),
        ]);

        let p2_json = r#"{"flows":[{"flow_id":"F1","name":"trade","group_ids":["G1"],"function_refs":["A.f","A.g"]}],"groups":[{"group_id":"G1","group_name":"core","functions":["A.f","A.g"]}]}"#;
        let p5_json = r#"{"flows":[{"flow_id":"F2","name":"withdraw","group_ids":["G2"],"function_refs":["B.h"]}],"groups":[{"group_id":"G2","group_name":"treasury","functions":["B.h"]}]}"#;

        let executor = ScriptedExecutor {
            responses: Mutex::new(
                vec![
                    "p0 free-form".to_string(), // P0
                    "p1 free-form".to_string(), // P1
                    p2_json.to_string(),        // P2
                    "p3 free-form".to_string(), // P3
                    "p4 free-form".to_string(), // P4
                    p5_json.to_string(),        // P5
                ]
                .into(),
            ),
        };

        let store = SqliteStore::open_in_memory().unwrap();
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let engine = PlanningEngine::new(&executor, &store, &config, CancellationToken::new());
        let project = Project::new("p1", PathBuf::from("/data/p1"));

        let summary = engine.run(&project, &catalog).await.unwrap();

        assert!(!summary.skipped);
        assert!(!summary.partial);
        assert_eq!(summary.flow_count, 2);
        assert_eq!(summary.task_count, 2 * config.rule_keys.len());
        assert!((summary.coverage - 1.0).abs() < 1e-9);

        let tasks = store.list_tasks_for_project("p1").unwrap();
        assert_eq!(tasks.len(), 2 * config.rule_keys.len());
        let trade_task = tasks.iter().find(|t| t.group == "F1").unwrap();
        assert_eq!(
            trade_task.business_flow_code,
            "function f() { trade(); }\n\nfunction g() { helper(); }"
        );
    }

    #[tokio::test]
    async fn replanning_an_already_planned_project_is_a_noop() {
        let catalog = InMemoryCatalog::new(vec![entry("A", "f", "a.sol", 1, "function f() {}")]);
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_task(NewTask {
                project_id: "p1".to_string(),
                name: "Fi:F0 x [reentrancy]".to_string(),
                content: String::new(),
                rule: serde_json::json!({}),
                rule_key: "reentrancy".to_string(),
                contract_code: String::new(),
                start_line: 0,
                end_line: 0,
                relative_file_path: String::new(),
                absolute_file_path: String::new(),
                business_flow_code: String::new(),
                group: "F0".to_string(),
            })
            .unwrap();

        let executor = ScriptedExecutor {
            responses: Mutex::new(std::collections::VecDeque::new()),
        };
        let config = PipelineConfig::from_env(PathBuf::from("/data"), Default::default());
        let engine = PlanningEngine::new(&executor, &store, &config, CancellationToken::new());
        let project = Project::new("p1", PathBuf::from("/data/p1"));

        let summary = engine.run(&project, &catalog).await.unwrap();
        assert!(summary.skipped);
        assert_eq!(store.list_tasks_for_project("p1").unwrap().len(), 1);
    }
}
