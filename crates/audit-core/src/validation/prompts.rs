//! Prompt assembly for the Validator role (§4.6, §6).

use crate::model::Finding;

pub fn validation_prompt(finding: &Finding) -> String {
    format!(
        "ROLE: Validator. Re-confirm this candidate finding with evidence-based search; \
         do not trust the description at face value.\n\
         RULE_KEY: {rule_key}\n\
         FINDING:\n{finding_json}\n\
         HINTS: file={file}, function context in business_flow_code below.\n\
         BUSINESS FLOW CODE:\n{code}\n\
         Respond with exactly one strict JSON object: {{\"schema_version\":\"validation_codex_v1\",\
         \"status\":\"pending|intended_design|false_positive|vulnerability|vuln_high_cost|vuln_low_impact|not_sure\",\
         \"confidence\":\"high|medium|low\",\"exists\":bool,\"classification\":str,\
         \"impact\":\"high|medium|low|unknown\",\"exploit_difficulty\":\"easy|medium|hard|unknown\",\
         \"reason\":str,\"evidence\":[{{\"file\":str,\"locator\":str,\"snippet\":str?,\"why\":str}}],\
         \"doc_references\":[str],\"attack_preconditions\":[str],\"attack_path\":str,\
         \"mitigation\":str,\"unknowns\":[str]}}",
        rule_key = finding.rule_key,
        finding_json = finding.finding_json,
        file = finding.task_relative_file_path,
        code = finding.task_business_flow_code,
    )
}
