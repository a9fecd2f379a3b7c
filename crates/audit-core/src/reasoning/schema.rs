//! Wire schemas for the Reasoner/Watcher/Ideator roles (§4.5, §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VulnerabilityJson {
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReasonerOutput {
    #[serde(default = "schema_v1")]
    pub schema_version: String,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnerabilityJson>,
}

fn schema_v1() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherDecision {
    Continue,
    Pivot,
    Stop,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WatcherBudget {
    pub max_more_rounds: Option<usize>,
    pub time_limit_sec: Option<u64>,
    pub no_progress_rounds: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherOutput {
    pub decision: WatcherDecision,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub budget_next: WatcherBudget,
    #[serde(default)]
    pub watcher_instruction: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct IdeatorOutput {
    #[serde(default)]
    pub new_hypotheses: Vec<String>,
    #[serde(default)]
    pub suggested_probes: Vec<String>,
    #[serde(default)]
    pub expected_evidence: Vec<String>,
}

pub fn parse_json_object<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
