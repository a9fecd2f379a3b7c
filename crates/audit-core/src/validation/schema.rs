//! Wire schema for the Validator's agent response (§6 Validation output schema).

use crate::model::ValidationStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploitDifficulty {
    Easy,
    Medium,
    Hard,
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Evidence {
    pub file: String,
    pub locator: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub why: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationResponse {
    #[serde(default = "schema_v1")]
    pub schema_version: String,
    pub status: ValidationStatus,
    pub confidence: Confidence,
    pub exists: bool,
    #[serde(default)]
    pub classification: String,
    pub impact: Impact,
    pub exploit_difficulty: ExploitDifficulty,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default)]
    pub doc_references: Vec<String>,
    #[serde(default)]
    pub attack_preconditions: Vec<String>,
    #[serde(default)]
    pub attack_path: String,
    #[serde(default)]
    pub mitigation: String,
    #[serde(default)]
    pub unknowns: Vec<String>,
}

fn schema_v1() -> String {
    "validation_codex_v1".to_string()
}

pub fn parse_validation_response(raw: &str) -> Option<ValidationResponse> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
