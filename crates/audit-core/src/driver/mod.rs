//! PipelineDriver (§4.8, C8): stage sequencing, bounded parallelism,
//! cancellation, resumability.

use crate::agent::AgentExecutor;
use crate::error::Result;
use crate::model::{CatalogBuilder, Finding};
use crate::planning::PlanningEngine;
use crate::reasoning::ReasoningLoop;
use crate::store::{RetryingStore, Store};
use crate::validation::Validator;
use crate::workspace::WorkspaceResolver;
use crate::PipelineConfig;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which stages of `parse → plan → reason → validate → export` to run
/// (§4.8, §6 CLI surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Plan,
    Reason,
    Validate,
    All,
}

impl Stage {
    fn runs_plan(self) -> bool {
        matches!(self, Stage::Plan | Stage::All)
    }
    fn runs_reason(self) -> bool {
        matches!(self, Stage::Reason | Stage::All)
    }
    fn runs_validate(self) -> bool {
        matches!(self, Stage::Validate | Stage::All)
    }
}

/// Per-project outcome, aggregated into a `RunReport`.
#[derive(Debug, Clone, Default)]
pub struct ProjectReport {
    pub project_id: String,
    /// Set when WorkspaceResolver or catalog construction failed; the
    /// project is skipped entirely but other projects still proceed (§7).
    pub aborted: Option<String>,
    pub planned_tasks: usize,
    pub reasoned_tasks: usize,
    pub reasoning_errors: usize,
    pub validated_findings: usize,
    pub validation_errors: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub projects: Vec<ProjectReport>,
}

impl RunReport {
    /// The driver returns a non-zero exit only when no stage produced any
    /// persisted rows (§7 user-visible behavior).
    pub fn any_rows_persisted(&self) -> bool {
        self.projects
            .iter()
            .any(|p| p.planned_tasks > 0 || p.reasoned_tasks > 0 || p.validated_findings > 0)
    }

    pub fn has_errors(&self) -> bool {
        self.projects
            .iter()
            .any(|p| p.aborted.is_some() || p.reasoning_errors > 0 || p.validation_errors > 0)
    }
}

pub struct PipelineDriver<'a> {
    resolver: &'a dyn WorkspaceResolver,
    catalog_builder: &'a dyn CatalogBuilder,
    executor: &'a dyn AgentExecutor,
    store: &'a dyn Store,
    config: &'a PipelineConfig,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(
        resolver: &'a dyn WorkspaceResolver,
        catalog_builder: &'a dyn CatalogBuilder,
        executor: &'a dyn AgentExecutor,
        store: &'a dyn Store,
        config: &'a PipelineConfig,
    ) -> Self {
        Self { resolver, catalog_builder, executor, store, config }
    }

    /// Run `stage` for every project in `project_ids`, bounded by
    /// `config.max_inter_project_parallel` (§5).
    pub async fn run(
        &self,
        project_ids: &[String],
        stage: Stage,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_inter_project_parallel.max(1)));
        let mut in_flight = FuturesUnordered::new();

        for project_id in project_ids {
            let permit = semaphore.clone();
            let cancel = cancel.clone();
            in_flight.push(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                if cancel.is_cancelled() {
                    return ProjectReport {
                        project_id: project_id.clone(),
                        aborted: Some("cancelled before scheduling".to_string()),
                        ..Default::default()
                    };
                }
                self.run_one_project(project_id, stage, &cancel).await
            });
        }

        let mut report = RunReport::default();
        while let Some(project_report) = in_flight.next().await {
            report.projects.push(project_report);
        }
        Ok(report)
    }

    /// Read-only: Findings not yet excluded by dedup, for export tooling
    /// (export formatting itself is out of scope, §1).
    pub fn export(&self, project_id: &str) -> Result<Vec<Finding>> {
        self.store.list_findings_for_export(project_id)
    }

    async fn run_one_project(&self, project_id: &str, stage: Stage, cancel: &CancellationToken) -> ProjectReport {
        let mut report = ProjectReport { project_id: project_id.to_string(), ..Default::default() };

        let project = match self.resolver.resolve(project_id) {
            Ok(p) => p,
            Err(err) => {
                report.aborted = Some(err.to_string());
                return report;
            }
        };

        let catalog = match self.catalog_builder.build(&project.workspace_root) {
            Ok(c) => c,
            Err(err) => {
                report.aborted = Some(err.to_string());
                return report;
            }
        };

        // A Store call that fails twice in a row cancels `cancel` (§7), which
        // stops `run()` from scheduling further projects; this project still
        // aborts immediately rather than proceeding against a known-bad store.
        let retrying_store =
            RetryingStore::new(self.store, cancel.clone(), Duration::from_millis(self.config.store_retry_backoff_ms));

        if stage.runs_plan() {
            let planner = PlanningEngine::new(self.executor, &retrying_store, self.config, cancel.clone());
            match planner.run(&project, catalog.as_ref()).await {
                Ok(summary) => report.planned_tasks = summary.task_count,
                Err(err) => {
                    report.aborted = Some(err.to_string());
                    return report;
                }
            }
        }

        if stage.runs_reason() && !cancel.is_cancelled() {
            let (reasoned, errors) = self.run_reasoning_stage(&project, &retrying_store, cancel).await;
            report.reasoned_tasks = reasoned;
            report.reasoning_errors = errors;
        }

        if stage.runs_validate() && !cancel.is_cancelled() {
            let validator = Validator::new(self.executor, &retrying_store, self.config);
            match validator.run_for_project(project_id, &project.workspace_root, cancel).await {
                Ok(summary) => {
                    report.validated_findings = summary.validated;
                    report.validation_errors = summary.errors;
                }
                Err(err) => report.aborted = Some(err.to_string()),
            }
        }

        report
    }

    /// Tasks sharing `group` execute serially; distinct groups run in
    /// parallel up to `max_reasoning_parallel` (§4.5, §5).
    async fn run_reasoning_stage(
        &self,
        project: &crate::model::Project,
        store: &dyn Store,
        cancel: &CancellationToken,
    ) -> (usize, usize) {
        let tasks = match store.list_tasks_for_project(&project.project_id) {
            Ok(t) => t,
            Err(_) => return (0, 1),
        };

        let mut groups: Vec<(String, Vec<i64>)> = Vec::new();
        for task in &tasks {
            match groups.iter_mut().find(|(g, _)| g == &task.group) {
                Some((_, ids)) => ids.push(task.id),
                None => groups.push((task.group.clone(), vec![task.id])),
            }
        }

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.max_reasoning_parallel.max(1)));
        let mut in_flight = FuturesUnordered::new();

        for (_, task_ids) in groups {
            let permit = semaphore.clone();
            let workspace_root = project.workspace_root.clone();
            let cancel = cancel.clone();
            in_flight.push(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                let reasoning_loop = ReasoningLoop::new(self.executor, store, self.config, cancel.clone());
                let mut completed = 0usize;
                let mut errors = 0usize;
                for task_id in task_ids {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match reasoning_loop.run(task_id, &workspace_root).await {
                        Ok(_) => completed += 1,
                        Err(_) => errors += 1,
                    }
                }
                (completed, errors)
            });
        }

        let mut total_completed = 0usize;
        let mut total_errors = 0usize;
        while let Some((completed, errors)) = in_flight.next().await {
            total_completed += completed;
            total_errors += errors;
        }
        (total_completed, total_errors)
    }
}
