//! `audit-pipeline` — the driver binary for the smart-contract audit
//! pipeline (§6 CLI surface). Wires the concrete `audit-sandbox`/`audit-catalog`
//! leaves into `audit_core::PipelineDriver` and reports per-project counts.

use audit_catalog::TreeSitterCatalogBuilder;
use audit_core::{ConfigOverrides, PipelineConfig, PipelineDriver, RunReport, Stage};
use audit_sandbox::executor::ProcessAgentExecutor;
use audit_sandbox::workspace::ManifestWorkspaceResolver;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageArg {
    Plan,
    Reason,
    Validate,
    All,
}

impl From<StageArg> for Stage {
    fn from(value: StageArg) -> Self {
        match value {
            StageArg::Plan => Stage::Plan,
            StageArg::Reason => Stage::Reason,
            StageArg::Validate => Stage::Validate,
            StageArg::All => Stage::All,
        }
    }
}

/// Mine, confirm, and persist vulnerability findings for a batch of
/// smart-contract projects (§1).
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project IDs to process; repeat the flag for more than one. Unset
    /// processes every project in the dataset manifest.
    #[arg(long = "project-id")]
    project_id: Vec<String>,

    /// Absolute base directory every resolved workspace root must fall under (I6).
    #[arg(long, env = "DATASET_BASE")]
    dataset_base: PathBuf,

    /// Dataset manifest JSON; defaults to `<dataset-base>/manifest.json` (§6).
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Which stage(s) to run.
    #[arg(long, value_enum, default_value = "all")]
    stage: StageArg,

    /// Bound on concurrently processed projects.
    #[arg(long)]
    max_parallel: Option<usize>,

    /// Bound on concurrently running reasoning groups.
    #[arg(long, env = "MAX_REASONING_PARALLEL")]
    max_reasoning_parallel: Option<usize>,

    /// Bound on concurrently validated findings.
    #[arg(long, env = "MAX_VALIDATION_PARALLEL")]
    max_validation_parallel: Option<usize>,

    /// Per-AgentExecutor-call deadline, in seconds.
    #[arg(long, env = "AGENT_TIMEOUT_SEC")]
    timeout_sec: Option<u64>,

    /// Backoff before a failed Store call's single retry, in milliseconds.
    #[arg(long, env = "STORE_RETRY_BACKOFF_MS")]
    store_retry_backoff_ms: Option<u64>,

    /// Checklist categories each finalized flow is scanned against (comma-separated).
    #[arg(long, env = "BUSINESS_FLOW_RULE_KEYS", value_delimiter = ',')]
    rule_keys: Option<Vec<String>>,

    /// Cap on reasoning rounds per task.
    #[arg(long, env = "REASONING_MAX_ROUNDS")]
    reasoning_max_rounds: Option<usize>,

    /// Planning coverage fraction that ends the repair loop.
    #[arg(long, env = "COVERAGE_TARGET")]
    coverage_target: Option<f64>,

    /// Allow optional PoC execution (workspace-write sandbox); default read-only.
    #[arg(long, default_value_t = false)]
    enable_poc_execution: bool,

    /// External analysis agent CLI to invoke as a sandboxed subprocess (C1).
    #[arg(long, env = "AUDIT_AGENT_CMD", default_value = "audit-agent")]
    agent_cmd: String,

    /// Extra arguments passed verbatim to the agent CLI.
    #[arg(long = "agent-arg")]
    agent_args: Vec<String>,

    /// SQLite database file backing the `Store` (§4.7).
    #[arg(long, default_value = "audit-pipeline.sqlite3")]
    db_path: PathBuf,

    /// Root directory for AgentExecutor artifact logs (§6 log directory layout).
    #[arg(long, default_value = "logs")]
    logs_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        max_inter_project_parallel: cli.max_parallel,
        max_reasoning_parallel: cli.max_reasoning_parallel,
        max_validation_parallel: cli.max_validation_parallel,
        agent_timeout_sec: cli.timeout_sec,
        rule_keys: cli.rule_keys,
        reasoning_max_rounds: cli.reasoning_max_rounds,
        coverage_target: cli.coverage_target,
        max_repair_rounds: None,
        allow_repair_modification: None,
        enable_poc_execution: Some(cli.enable_poc_execution),
        store_retry_backoff_ms: cli.store_retry_backoff_ms,
    };
    let config = PipelineConfig::from_env(cli.dataset_base.clone(), overrides);

    let manifest_path = cli
        .manifest
        .clone()
        .unwrap_or_else(|| cli.dataset_base.join("manifest.json"));

    let resolver = match ManifestWorkspaceResolver::load(cli.dataset_base.clone(), &manifest_path) {
        Ok(r) => r,
        Err(err) => {
            tracing::error!(error = %err, "failed to load dataset manifest");
            std::process::exit(2);
        }
    };

    let project_ids = if cli.project_id.is_empty() {
        match resolver.list_project_ids() {
            Ok(ids) => ids,
            Err(err) => {
                tracing::error!(error = %err, "failed to enumerate dataset manifest");
                std::process::exit(2);
            }
        }
    } else {
        cli.project_id.clone()
    };

    let catalog_builder = TreeSitterCatalogBuilder::new();
    let executor = ProcessAgentExecutor::new(cli.agent_cmd.clone(), cli.agent_args.clone(), cli.logs_dir.clone());
    let store = match audit_core::SqliteStore::open(&cli.db_path) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, "failed to open store");
            std::process::exit(3);
        }
    };

    let driver = PipelineDriver::new(&resolver, &catalog_builder, &executor, &store, &config);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancellation requested, waiting for in-flight work to settle");
            cancel_for_signal.cancel();
        }
    });

    tracing::info!(stage = ?cli.stage, projects = project_ids.len(), "starting audit pipeline run");
    let report = driver.run(&project_ids, cli.stage.into(), cancel).await?;

    print_summary(&report);
    std::process::exit(exit_code_for(&report));
}

fn print_summary(report: &RunReport) {
    let planned: usize = report.projects.iter().map(|p| p.planned_tasks).sum();
    let reasoned: usize = report.projects.iter().map(|p| p.reasoned_tasks).sum();
    let validated: usize = report.projects.iter().map(|p| p.validated_findings).sum();
    let errors: usize = report
        .projects
        .iter()
        .map(|p| p.reasoning_errors + p.validation_errors + usize::from(p.aborted.is_some()))
        .sum();

    tracing::info!(planned, reasoned, validated, errors, "run complete");
    for project in &report.projects {
        if let Some(reason) = &project.aborted {
            tracing::warn!(project_id = %project.project_id, reason = %reason, "project aborted");
        }
    }
}

/// Exit codes per §6: 0 success, 2 workspace error, 3 unrecoverable executor
/// error, 4 partial completion. §7: non-zero only when a stage produced no
/// persisted rows at all; otherwise the run is successful-partial.
fn exit_code_for(report: &RunReport) -> i32 {
    if report.projects.is_empty() {
        return 0;
    }
    if !report.any_rows_persisted() {
        let all_workspace = report
            .projects
            .iter()
            .all(|p| p.aborted.as_deref().map(|r| r.contains("workspace")).unwrap_or(false));
        return if all_workspace { 2 } else { 3 };
    }
    if report.has_errors() {
        return 4;
    }
    0
}
