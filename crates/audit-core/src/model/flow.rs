//! Planning-time Group/Flow structures (§3 Entities: Group, Flow).
//!
//! Gi/Fi live only in planning memory plus serialized inside `Task.rule`;
//! there is no separate table for them (§3 Lifecycle). IDs never recycle or
//! reorder once assigned (I5) — `IdAllocator` below is the single source of
//! monotonically increasing IDs for one planning run.

use serde::{Deserialize, Serialize};

/// Monotonically increasing ID allocator, one per `PlanningEngine` run.
/// Never resets or reuses an ID once handed out (I5).
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_group: u64,
    next_flow: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_group_id(&mut self) -> String {
        let id = self.next_group;
        self.next_group += 1;
        format!("G{}", id)
    }

    pub fn next_flow_id(&mut self) -> String {
        let id = self.next_flow;
        self.next_flow += 1;
        format!("F{}", id)
    }

    /// Register an ID already in use (e.g. parsed from an agent response) so
    /// a later `next_*_id` call never hands out a value that could collide.
    pub fn observe_group_id(&mut self, id: &str) {
        if let Some(n) = Self::parse_index(id, 'G') {
            self.next_group = self.next_group.max(n + 1);
        }
    }

    pub fn observe_flow_id(&mut self, id: &str) {
        if let Some(n) = Self::parse_index(id, 'F') {
            self.next_flow = self.next_flow.max(n + 1);
        }
    }

    fn parse_index(id: &str, prefix: char) -> Option<u64> {
        let rest = id.strip_prefix(prefix)?;
        rest.parse().ok()
    }
}

/// A named capability bucket grouping related flows by domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    /// Function references as emitted by the agent, pre-resolution.
    pub function_refs: Vec<String>,
}

/// Resolution status of one function reference within a finalized Flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefStatus {
    Matched,
    Ambiguous,
    Missing,
}

/// An ordered business flow: a semantically related execution path through
/// the project, expressed as a list of function references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: String,
    pub name: String,
    pub group_ids: Vec<String>,
    /// Raw references as emitted by the agent, in order, before resolution.
    pub function_refs: Vec<String>,
    /// Refs that matched exactly one FunctionEntry; these alone contribute to
    /// coverage and `business_flow_code` (§4.4 Phase A).
    pub matched_refs: Vec<String>,
    /// Refs that matched more than one FunctionEntry — diagnostics only.
    pub ambiguous_refs: Vec<String>,
    /// Refs that matched no FunctionEntry — diagnostics only.
    pub missing_refs: Vec<String>,
}

impl Flow {
    pub fn new(flow_id: String, name: String, group_ids: Vec<String>, function_refs: Vec<String>) -> Self {
        Self {
            flow_id,
            name,
            group_ids,
            function_refs,
            matched_refs: Vec::new(),
            ambiguous_refs: Vec::new(),
            missing_refs: Vec::new(),
        }
    }

    /// Classify raw `function_refs` against a catalog, populating
    /// matched/ambiguous/missing (I1: matched refs are a subset of the catalog).
    pub fn resolve_against(&mut self, catalog: &dyn crate::model::catalog::FunctionCatalog) {
        use crate::model::catalog::ResolveOutcome;
        self.matched_refs.clear();
        self.ambiguous_refs.clear();
        self.missing_refs.clear();
        for raw in &self.function_refs {
            match catalog.resolve(raw) {
                ResolveOutcome::Matched(entry) => self.matched_refs.push(entry.canonical_ref()),
                ResolveOutcome::Ambiguous(_) => self.ambiguous_refs.push(raw.clone()),
                ResolveOutcome::Missing => self.missing_refs.push(raw.clone()),
            }
        }
    }
}
