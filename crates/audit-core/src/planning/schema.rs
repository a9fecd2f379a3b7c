//! Wire schema for the `business_flow_planning_v1` JSON the planning agent
//! converges to at P2/P5 (§4.4, §6).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PlanningGroupJson {
    pub group_id: String,
    #[serde(alias = "name")]
    pub group_name: String,
    #[serde(alias = "function_refs")]
    pub functions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanningFlowJson {
    pub flow_id: String,
    pub name: String,
    #[serde(default)]
    pub group_ids: Vec<String>,
    pub function_refs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlanningDocument {
    #[serde(default)]
    pub groups: Vec<PlanningGroupJson>,
    #[serde(default)]
    pub flows: Vec<PlanningFlowJson>,
}

/// Parse one P2/P5 response as strict JSON. Extra agent chatter surrounding
/// the object (a common agent failure mode) is tolerated by extracting the
/// outermost `{...}` span before parsing.
pub fn parse_planning_json(raw: &str) -> Result<PlanningDocument, serde_json::Error> {
    let trimmed = extract_json_object(raw).unwrap_or(raw);
    serde_json::from_str(trimmed)
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        Some(&raw[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_document_wrapped_in_agent_chatter() {
        let raw = "Here is the plan:\n{\"groups\":[{\"group_id\":\"G1\",\"group_name\":\"core\",\"functions\":[\"A.f\"]}],\"flows\":[{\"flow_id\":\"F1\",\"name\":\"trade\",\"group_ids\":[\"G1\"],\"function_refs\":[\"A.f\"]}]}\nDone.";
        let doc = parse_planning_json(raw).unwrap();
        assert_eq!(doc.groups.len(), 1);
        assert_eq!(doc.flows[0].flow_id, "F1");
    }

    #[test]
    fn rejects_non_json_garbage() {
        assert!(parse_planning_json("not json at all").is_err());
    }
}
