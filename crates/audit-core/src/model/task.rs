//! Task entity (§3 Entities: Task; §6 `project_task` columns). One Task per
//! (Fi × rule_key), created by PlanningEngine and mutated only by
//! ReasoningLoop (I7).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Split/aggregation status of a Task's reasoning result (§3, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShortResult {
    /// No aggregated result recorded yet, or a split attempt failed and must
    /// be retried from scratch.
    Empty,
    /// `result` has been fully split into Finding rows (I3).
    SplitDone,
    /// A split was attempted and failed after `result` was written; resumable.
    SplitFailed,
}

impl ShortResult {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ShortResult::Empty => "",
            ShortResult::SplitDone => "split_done",
            ShortResult::SplitFailed => "split_failed",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "split_done" => ShortResult::SplitDone,
            "split_failed" => ShortResult::SplitFailed,
            _ => ShortResult::Empty,
        }
    }
}

/// One unit of reasoning work: a finalized Flow scanned against one rule_key,
/// bound to the concatenated bodies of its resolved function refs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub uuid: Uuid,
    pub project_id: String,
    pub name: String,
    /// Short human-readable summary shown in reports; distinct from
    /// `business_flow_code` (the raw concatenated source).
    pub content: String,
    /// Checklist JSON: flow_id, flow_name, group_ids, function_refs,
    /// missing/ambiguous refs, planning_stage, rule_key, checklist items.
    pub rule: serde_json::Value,
    pub rule_key: String,
    /// Aggregated multi-vulnerability JSON from the last reasoning round, or
    /// an empty string before the first Reasoner call.
    pub result: String,
    /// Full source of the primary (first matched-ref) file, for extra
    /// reviewer context beyond the flow's own function bodies.
    pub contract_code: String,
    /// Minimum start line across matched refs, or 0 if none matched.
    pub start_line: i64,
    /// Maximum end line across matched refs, or 0 if none matched.
    pub end_line: i64,
    pub relative_file_path: String,
    pub absolute_file_path: String,
    /// Populated by future export tooling; left empty by the pipeline itself.
    pub recommendation: String,
    /// Concatenated bodies of resolved `function_refs`, in ref order (I2).
    pub business_flow_code: String,
    /// Per-round reasoning trace JSON (`reasoning_trace_v1`), or empty.
    pub scan_record: String,
    pub short_result: ShortResult,
    /// == flow_id, so tasks sharing a Flow execute group-serial (§5).
    pub group: String,
}

impl Task {
    pub fn task_name(flow_id: &str, flow_name: &str, rule_key: &str) -> String {
        format!("Fi:{} {} [{}]", flow_id, flow_name, rule_key)
    }
}

/// Fields needed to insert a new Task row; `id`/`uuid` are assigned by the Store.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: String,
    pub name: String,
    pub content: String,
    pub rule: serde_json::Value,
    pub rule_key: String,
    pub contract_code: String,
    pub start_line: i64,
    pub end_line: i64,
    pub relative_file_path: String,
    pub absolute_file_path: String,
    pub business_flow_code: String,
    pub group: String,
}
