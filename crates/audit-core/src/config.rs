//! Explicit configuration record threaded from the CLI into every component.
//!
//! No component reads environment variables directly past startup; `audit-cli`
//! snapshots them once into a [`PipelineConfig`] and passes it down, per the
//! "no hidden globals" design note (spec §9).

use std::path::PathBuf;

/// Default coverage target PlanningEngine's repair phase converges toward.
pub const DEFAULT_COVERAGE_TARGET: f64 = 0.90;

/// Default rule keys applied to every finalized flow when
/// `BUSINESS_FLOW_RULE_KEYS` is unset.
pub fn default_rule_keys() -> Vec<String> {
    vec![
        "reentrancy".to_string(),
        "access-control".to_string(),
        "arithmetic".to_string(),
        "oracle-manipulation".to_string(),
    ]
}

/// Top-level run configuration, constructed once per invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Absolute base directory all project workspaces must resolve under.
    pub dataset_base: PathBuf,
    /// Bound on concurrently processed projects.
    pub max_inter_project_parallel: usize,
    /// Bound on concurrently running reasoning groups (one worker per `group`).
    pub max_reasoning_parallel: usize,
    /// Bound on concurrently validated findings.
    pub max_validation_parallel: usize,
    /// Per-AgentExecutor-call deadline.
    pub agent_timeout_sec: u64,
    /// Checklist categories each finalized flow is scanned against.
    pub rule_keys: Vec<String>,
    /// Cap on reasoning rounds per task before Watcher is forced to stop.
    pub reasoning_max_rounds: usize,
    /// Planning coverage fraction that ends the repair loop (§4.4 Phase B).
    pub coverage_target: f64,
    /// Cap on PlanningEngine repair rounds (Phase B), independent of coverage.
    pub max_repair_rounds: usize,
    /// Whether P3/P4 may emit `~` modifications to existing flows (default: disabled).
    pub allow_repair_modification: bool,
    /// Whether the Reasoner/Validator may request a workspace-write sandbox
    /// for optional PoC execution (default: disabled, stays read-only).
    pub enable_poc_execution: bool,
    /// Backoff between a failed Store call and its single retry (§7 StoreError policy).
    pub store_retry_backoff_ms: u64,
}

impl PipelineConfig {
    /// Build a config from explicit CLI values, falling back to environment
    /// variables and then to documented defaults (spec §6).
    pub fn from_env(dataset_base: PathBuf, overrides: ConfigOverrides) -> Self {
        let env_usize = |key: &str| std::env::var(key).ok().and_then(|v| v.parse().ok());
        let env_f64 = |key: &str| std::env::var(key).ok().and_then(|v| v.parse().ok());
        let env_u64 = |key: &str| std::env::var(key).ok().and_then(|v| v.parse().ok());

        let rule_keys = overrides.rule_keys.unwrap_or_else(|| {
            std::env::var("BUSINESS_FLOW_RULE_KEYS")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_rule_keys)
        });

        Self {
            dataset_base,
            max_inter_project_parallel: overrides.max_inter_project_parallel.unwrap_or(4),
            max_reasoning_parallel: overrides
                .max_reasoning_parallel
                .or_else(|| env_usize("MAX_REASONING_PARALLEL"))
                .unwrap_or_else(num_cpus_fallback),
            max_validation_parallel: overrides
                .max_validation_parallel
                .or_else(|| env_usize("MAX_VALIDATION_PARALLEL"))
                .unwrap_or(3),
            agent_timeout_sec: overrides
                .agent_timeout_sec
                .or_else(|| env_u64("AGENT_TIMEOUT_SEC"))
                .unwrap_or(900),
            rule_keys,
            reasoning_max_rounds: overrides
                .reasoning_max_rounds
                .or_else(|| env_usize("REASONING_MAX_ROUNDS"))
                .unwrap_or(6),
            coverage_target: overrides
                .coverage_target
                .or_else(|| env_f64("COVERAGE_TARGET"))
                .unwrap_or(DEFAULT_COVERAGE_TARGET),
            max_repair_rounds: overrides.max_repair_rounds.unwrap_or(4),
            allow_repair_modification: overrides.allow_repair_modification.unwrap_or(false),
            enable_poc_execution: overrides.enable_poc_execution.unwrap_or(false),
            store_retry_backoff_ms: overrides
                .store_retry_backoff_ms
                .or_else(|| env_u64("STORE_RETRY_BACKOFF_MS"))
                .unwrap_or(200),
        }
    }
}

/// CLI-sourced overrides applied before environment variables and defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub max_inter_project_parallel: Option<usize>,
    pub max_reasoning_parallel: Option<usize>,
    pub max_validation_parallel: Option<usize>,
    pub agent_timeout_sec: Option<u64>,
    pub rule_keys: Option<Vec<String>>,
    pub reasoning_max_rounds: Option<usize>,
    pub coverage_target: Option<f64>,
    pub max_repair_rounds: Option<usize>,
    pub allow_repair_modification: Option<bool>,
    pub enable_poc_execution: Option<bool>,
    pub store_retry_backoff_ms: Option<u64>,
}

fn num_cpus_fallback() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_overrides_or_env() {
        std::env::remove_var("MAX_VALIDATION_PARALLEL");
        std::env::remove_var("COVERAGE_TARGET");
        let cfg = PipelineConfig::from_env(PathBuf::from("/data"), ConfigOverrides::default());
        assert_eq!(cfg.max_validation_parallel, 3);
        assert!((cfg.coverage_target - DEFAULT_COVERAGE_TARGET).abs() < 1e-9);
        assert_eq!(cfg.rule_keys, default_rule_keys());
    }

    #[test]
    fn overrides_take_priority_over_env() {
        std::env::set_var("MAX_VALIDATION_PARALLEL", "9");
        let overrides = ConfigOverrides {
            max_validation_parallel: Some(2),
            ..Default::default()
        };
        let cfg = PipelineConfig::from_env(PathBuf::from("/data"), overrides);
        assert_eq!(cfg.max_validation_parallel, 2);
        std::env::remove_var("MAX_VALIDATION_PARALLEL");
    }
}
