//! Prompt assembly for P0–P5 (§4.4). Checklist text content itself is out of
//! scope (§1); these builders only carry the structural constraints the spec
//! pins down.

use crate::model::FunctionCatalog;

pub fn p0_prompt(catalog: &dyn FunctionCatalog) -> String {
    let identities: Vec<String> = catalog.list().iter().map(|e| e.canonical_ref()).collect();
    format!(
        "ROLE: business-flow planner, pass P0 (forward extraction).\n\
         CATALOG ({count} functions):\n{identities}\n\
         HARD CONSTRAINTS: every function_ref must be drawn verbatim from the catalog above; \
         no external interfaces; no bare function names without a container; no constants or events.\n\
         Propose groups (Gi) and flows (Fi) as free-form structured lines.",
        count = identities.len(),
        identities = identities.join("\n"),
    )
}

pub fn p1_prompt(catalog: &dyn FunctionCatalog, previous: &str) -> String {
    format!(
        "ROLE: business-flow planner, pass P1 (incremental augmentation).\n\
         PREVIOUS OUTPUT:\n{previous}\n\
         Emit only `+` (new) or `~` (modify) lines. All previously allocated Gi/Fi IDs must be preserved.\n\
         CATALOG SIZE: {count} functions.",
        previous = previous,
        count = catalog.len(),
    )
}

pub fn p2_prompt(previous: &str, strict: bool) -> String {
    let reminder = if strict {
        "REMINDER: your previous response failed JSON parsing. Output ONLY the JSON object, no prose before or after."
    } else {
        "Output ONLY the JSON object, no prose before or after."
    };
    format!(
        "ROLE: business-flow planner, pass P2 (converge to JSON).\n\
         INPUT:\n{previous}\n\
         {reminder}\n\
         SCHEMA: {{\"groups\":[{{\"group_id\":str,\"group_name\":str,\"functions\":[str]}}],\
         \"flows\":[{{\"flow_id\":str,\"name\":str,\"group_ids\":[str],\"function_refs\":[str]}}]}}",
        previous = previous,
        reminder = reminder,
    )
}

pub fn p3_prompt(uncovered_batch: &[String]) -> String {
    format!(
        "ROLE: business-flow planner, pass P3 (coverage repair, new flows only).\n\
         UNCOVERED BATCH ({count} refs):\n{refs}\n\
         Produce NEW Gi/Fi using only refs from this batch. Prefer fewer, larger flows. \
         Do not modify any existing Flow.",
        count = uncovered_batch.len(),
        refs = uncovered_batch.join("\n"),
    )
}

pub fn p4_prompt(previous: &str, residual: &[String]) -> String {
    format!(
        "ROLE: business-flow planner, pass P4 (incremental pass on residual uncovered set).\n\
         PREVIOUS REPAIR OUTPUT:\n{previous}\n\
         RESIDUAL UNCOVERED ({count} refs):\n{refs}",
        previous = previous,
        count = residual.len(),
        refs = residual.join("\n"),
    )
}

pub fn p5_prompt(previous: &str, strict: bool) -> String {
    let reminder = if strict {
        "REMINDER: your previous response failed JSON parsing. Output ONLY the JSON delta object."
    } else {
        "Output ONLY the JSON delta object, no prose before or after."
    };
    format!(
        "ROLE: business-flow planner, pass P5 (converge repair delta to JSON).\n\
         INPUT:\n{previous}\n\
         {reminder}\n\
         New Gi/Fi IDs must be strictly greater than any previously allocated ID.\n\
         SCHEMA: {{\"groups\":[{{\"group_id\":str,\"group_name\":str,\"functions\":[str]}}],\
         \"flows\":[{{\"flow_id\":str,\"name\":str,\"group_ids\":[str],\"function_refs\":[str]}}]}}",
        previous = previous,
        reminder = reminder,
    )
}
