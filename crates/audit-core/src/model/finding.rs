//! Finding entity (§3 Entities: Finding). Created by ReasoningLoop's split
//! step, mutated by dedup and Validator (I7).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deduplication status. Empty and `Kept` are semantically equivalent
/// ("not deleted") for query purposes — an open question in spec §9 resolved
/// that way here; see DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupStatus {
    Empty,
    Kept,
    Delete,
}

impl DedupStatus {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DedupStatus::Delete)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            DedupStatus::Empty => "",
            DedupStatus::Kept => "kept",
            DedupStatus::Delete => "delete",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "kept" => DedupStatus::Kept,
            "delete" => DedupStatus::Delete,
            _ => DedupStatus::Empty,
        }
    }
}

/// Closed enum of validation outcomes (§6 Validation output schema).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Empty,
    Pending,
    IntendedDesign,
    FalsePositive,
    Vulnerability,
    VulnHighCost,
    VulnLowImpact,
    NotSure,
    Error,
}

impl ValidationStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ValidationStatus::Empty => "",
            ValidationStatus::Pending => "pending",
            ValidationStatus::IntendedDesign => "intended_design",
            ValidationStatus::FalsePositive => "false_positive",
            ValidationStatus::Vulnerability => "vulnerability",
            ValidationStatus::VulnHighCost => "vuln_high_cost",
            ValidationStatus::VulnLowImpact => "vuln_low_impact",
            ValidationStatus::NotSure => "not_sure",
            ValidationStatus::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "pending" => ValidationStatus::Pending,
            "intended_design" => ValidationStatus::IntendedDesign,
            "false_positive" => ValidationStatus::FalsePositive,
            "vulnerability" => ValidationStatus::Vulnerability,
            "vuln_high_cost" => ValidationStatus::VulnHighCost,
            "vuln_low_impact" => ValidationStatus::VulnLowImpact,
            "not_sure" => ValidationStatus::NotSure,
            "error" => ValidationStatus::Error,
            _ => ValidationStatus::Empty,
        }
    }

    /// Selection predicate for the Validator (§4.6): still needs validating.
    pub fn is_pending_validation(&self) -> bool {
        matches!(self, ValidationStatus::Empty | ValidationStatus::Pending)
    }

    /// Terminal statuses for which re-running the Validator is a no-op (§8).
    pub fn is_final(&self) -> bool {
        !self.is_pending_validation()
    }
}

/// A single-vulnerability record split out of a Task's aggregated result.
/// The unit of dedup, validation, and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub uuid: Uuid,
    pub project_id: String,
    pub task_id: i64,
    pub task_uuid: Uuid,
    pub rule_key: String,
    /// Single-vulnerability JSON, `schema_version = "1.0"`, exactly one
    /// element in `vulnerabilities` (I4).
    pub finding_json: serde_json::Value,

    // Denormalized snapshot of the owning Task at split time (§9: breaks the
    // Task/Finding cycle so Findings are self-contained for export/validation).
    pub task_name: String,
    pub task_content: String,
    pub task_business_flow_code: String,
    pub task_contract_code: String,
    pub task_start_line: i64,
    pub task_end_line: i64,
    pub task_relative_file_path: String,
    pub task_absolute_file_path: String,
    pub task_rule: serde_json::Value,
    pub task_group: String,

    pub dedup_status: DedupStatus,
    pub validation_status: ValidationStatus,
    /// Structured audit trail written exclusively by the Validator.
    pub validation_record: Option<serde_json::Value>,
}

/// Extract the single vulnerability description from a Finding's
/// `finding_json.vulnerabilities[0].description`, for I3/P2 comparisons.
pub fn finding_description(finding_json: &serde_json::Value) -> Option<&str> {
    finding_json
        .get("vulnerabilities")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.get("description"))
        .and_then(|v| v.as_str())
}

/// Build one single-vulnerability `finding_json` from an element of a Task's
/// aggregated `result.vulnerabilities` array (§4.5 SPLIT).
pub fn wrap_single_vulnerability(vuln: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "schema_version": "1.0",
        "vulnerabilities": [vuln],
    })
}

#[derive(Debug, Clone)]
#[allow(clippy::too_many_arguments)]
pub struct FindingDraft {
    pub project_id: String,
    pub task_id: i64,
    pub task_uuid: Uuid,
    pub rule_key: String,
    pub finding_json: serde_json::Value,
    pub task_name: String,
    pub task_content: String,
    pub task_business_flow_code: String,
    pub task_contract_code: String,
    pub task_start_line: i64,
    pub task_end_line: i64,
    pub task_relative_file_path: String,
    pub task_absolute_file_path: String,
    pub task_rule: serde_json::Value,
    pub task_group: String,
}
