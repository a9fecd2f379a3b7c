//! Prompt assembly for the Reasoner/Watcher/Ideator roles (§4.5).

use crate::model::Task;

pub fn reasoner_prompt(task: &Task, watcher_instruction: &str) -> String {
    format!(
        "ROLE: Reasoner. NEUTRAL AUDITING STANCE — a zero-finding response is a legal outcome.\n\
         RULE_KEY: {rule_key}\n\
         WATCHER INSTRUCTION: {instruction}\n\
         BUSINESS FLOW CODE:\n{code}\n\
         For each candidate vulnerability, the description MUST embed: trigger conditions, \
         impact, concrete evidence locators (function, file, key statement), and a \
         false-positive rebuttal.\n\
         Respond with strict JSON: {{\"schema_version\":\"1.0\",\"vulnerabilities\":[{{\"description\":str}},...]}}",
        rule_key = task.rule_key,
        instruction = watcher_instruction,
        code = task.business_flow_code,
    )
}

pub fn watcher_init_prompt(task: &Task) -> String {
    format!(
        "ROLE: Watcher, initializing budget for a new reasoning run.\n\
         RULE_KEY: {rule_key}\n\
         Emit an initial `watcher_instruction` and a starting budget (3-6 rounds default).\n\
         Respond with strict JSON: {{\"decision\":\"continue\",\"reason\":str,\
         \"budget_next\":{{\"max_more_rounds\":int,\"time_limit_sec\":int,\"no_progress_rounds\":int}},\
         \"watcher_instruction\":str}}",
        rule_key = task.rule_key,
    )
}

pub fn watcher_eval_prompt(
    task: &Task,
    round: usize,
    new_descriptions: &[String],
    no_progress_rounds: usize,
    rounds_remaining: usize,
) -> String {
    format!(
        "ROLE: Watcher, round {round} evaluation.\n\
         RULE_KEY: {rule_key}\n\
         NEW NON-DUPLICATE FINDINGS THIS ROUND: {new_count}\n\
         CONSECUTIVE ZERO-PROGRESS ROUNDS: {no_progress_rounds}\n\
         ROUNDS REMAINING IN BUDGET: {rounds_remaining}\n\
         Decide `continue` (new findings and budget remains), `pivot` (two consecutive \
         zero-progress rounds, or repeated instructions), or `stop` (budget exhausted or no \
         pending hypotheses and no new findings).\n\
         Respond with strict JSON: {{\"decision\":\"continue|pivot|stop\",\"reason\":str,\
         \"budget_next\":{{\"max_more_rounds\":int,\"time_limit_sec\":int,\"no_progress_rounds\":int}},\
         \"watcher_instruction\":str}}",
        round = round,
        rule_key = task.rule_key,
        new_count = new_descriptions.len(),
        no_progress_rounds = no_progress_rounds,
        rounds_remaining = rounds_remaining,
    )
}

pub fn ideator_prompt(
    watcher_instruction: &str,
    confirmed: &[String],
    pending_budget_rounds: usize,
) -> String {
    format!(
        "ROLE: Ideator, invoked after a Watcher `pivot`.\n\
         CURRENT WATCHER INSTRUCTION: {instruction}\n\
         CONFIRMED HYPOTHESES SO FAR: {confirmed}\n\
         ROUNDS REMAINING: {rounds}\n\
         Propose new, concretely executable hypotheses (keyword, file, or variable) to redirect \
         the Reasoner.\n\
         Respond with strict JSON: {{\"new_hypotheses\":[str,...],\"suggested_probes\":[str,...],\
         \"expected_evidence\":[str,...]}}",
        instruction = watcher_instruction,
        confirmed = confirmed.join("; "),
        rounds = pending_budget_rounds,
    )
}
