//! FunctionCatalog contract (§4.2, C3).
//!
//! The concrete tree-sitter-backed implementation lives in `audit-catalog`;
//! this crate only defines the data it produces and the resolution contract
//! `PlanningEngine` depends on, so `audit-core` never needs a tree-sitter
//! dependency of its own.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Visibility of a function/method as reported by the source parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

/// One function/method entry in a project's catalog (§3 Entities: FunctionEntry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    /// Enclosing contract/module/struct name.
    pub container: String,
    /// Function name, already normalized (`constructor|receive|fallback` canonicalized).
    pub name: String,
    /// Optional parameter signature, used to disambiguate overloads.
    pub signature: Option<String>,
    pub file_path: PathBuf,
    pub start_line: u32,
    pub end_line: u32,
    pub visibility: Visibility,
    pub body_text: String,
}

impl FunctionEntry {
    /// Canonical external identity: `Container.name` or `Container.name(signature)`.
    pub fn canonical_ref(&self) -> String {
        match &self.signature {
            Some(sig) => format!("{}.{}({})", self.container, self.name, sig),
            None => format!("{}.{}", self.container, self.name),
        }
    }

    /// Identity without signature, used for name-only matching.
    pub fn name_ref(&self) -> String {
        format!("{}.{}", self.container, self.name)
    }
}

/// Outcome of resolving one external textual reference against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Exactly one entry matched unambiguously.
    Matched(FunctionEntry),
    /// More than one entry matched by name; the first deterministic candidate
    /// (ordered by `file_path` then `start_line`) is still returned, flagged.
    Ambiguous(FunctionEntry),
    /// No entry matched.
    Missing,
}

/// Read-only view over a project's functions, built once at planning start
/// and immutable for the remainder of the run (§3 Lifecycle).
pub trait FunctionCatalog: Send + Sync {
    /// All function entries in the project, in no particular guaranteed order.
    fn list(&self) -> &[FunctionEntry];

    /// Resolve an external textual reference (`Container.name` optionally
    /// with a signature) to a catalog entry, applying the normalization
    /// rules of §4.2: trim whitespace, canonicalize `constructor|receive|fallback`,
    /// prefer a signature-exact match, otherwise match by `Container.name`,
    /// and on multi-match return the first deterministic candidate ordered
    /// by `(file_path, start_line)`.
    fn resolve(&self, reference: &str) -> ResolveOutcome;

    /// Total number of distinct functions in the catalog (coverage denominator).
    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.list().is_empty()
    }
}

/// Normalize a raw textual reference before matching: trims whitespace and
/// canonicalizes Solidity's special function names.
pub fn normalize_reference(raw: &str) -> String {
    let trimmed = raw.trim();
    let canonical_specials = ["constructor", "receive", "fallback"];
    for special in canonical_specials {
        if trimmed.eq_ignore_ascii_case(special) {
            return special.to_string();
        }
        // `Container.constructor` style references keep their container prefix.
        if let Some((container, method)) = trimmed.rsplit_once('.') {
            if method.eq_ignore_ascii_case(special) {
                return format!("{}.{}", container, special);
            }
        }
    }
    trimmed.to_string()
}

/// Split a normalized reference into `(name_part, signature_part)`, where
/// `name_part` is `Container.name` and `signature_part` is the content of a
/// trailing `(...)` if present.
pub fn split_signature(normalized: &str) -> (&str, Option<&str>) {
    if let Some(open) = normalized.find('(') {
        if let Some(close) = normalized.rfind(')') {
            if close > open {
                return (&normalized[..open], Some(&normalized[open + 1..close]));
            }
        }
    }
    (normalized, None)
}

/// Builds a project's `FunctionCatalog` from its source tree (§4.2, C3). The
/// concrete tree-sitter-backed implementation lives in `audit-catalog`; this
/// crate depends only on the trait so `PlanningEngine` stays parser-agnostic.
pub trait CatalogBuilder: Send + Sync {
    fn build(&self, workspace_root: &Path) -> crate::error::Result<Box<dyn FunctionCatalog>>;
}

/// Generic in-memory `FunctionCatalog` over a fixed `Vec<FunctionEntry>`,
/// shared by the tree-sitter backed constructor in `audit-catalog` and by
/// tests in this crate.
#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    entries: Vec<FunctionEntry>,
}

impl InMemoryCatalog {
    pub fn new(mut entries: Vec<FunctionEntry>) -> Self {
        entries.sort_by(|a, b| {
            a.file_path
                .cmp(&b.file_path)
                .then(a.start_line.cmp(&b.start_line))
        });
        Self { entries }
    }
}

impl FunctionCatalog for InMemoryCatalog {
    fn list(&self) -> &[FunctionEntry] {
        &self.entries
    }

    fn resolve(&self, reference: &str) -> ResolveOutcome {
        let normalized = normalize_reference(reference);
        let (name_part, sig_part) = split_signature(&normalized);

        if let Some(sig) = sig_part {
            let exact: Vec<&FunctionEntry> = self
                .entries
                .iter()
                .filter(|e| e.name_ref() == name_part && e.signature.as_deref() == Some(sig))
                .collect();
            if let Some(first) = exact.first() {
                return if exact.len() > 1 {
                    ResolveOutcome::Ambiguous((*first).clone())
                } else {
                    ResolveOutcome::Matched((*first).clone())
                };
            }
        }

        let by_name: Vec<&FunctionEntry> = self
            .entries
            .iter()
            .filter(|e| e.name_ref() == name_part)
            .collect();

        match by_name.len() {
            0 => ResolveOutcome::Missing,
            1 => ResolveOutcome::Matched(by_name[0].clone()),
            _ => ResolveOutcome::Ambiguous(by_name[0].clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(container: &str, name: &str, file: &str, line: u32) -> FunctionEntry {
        FunctionEntry {
            container: container.to_string(),
            name: name.to_string(),
            signature: None,
            file_path: PathBuf::from(file),
            start_line: line,
            end_line: line + 5,
            visibility: Visibility::Public,
            body_text: format!("fn {}() {{}}", name),
        }
    }

    #[test]
    fn resolve_matches_unique_name() {
        let cat = InMemoryCatalog::new(vec![entry("A", "f", "a.sol", 1)]);
        assert_eq!(cat.resolve("A.f"), ResolveOutcome::Matched(entry("A", "f", "a.sol", 1)));
    }

    #[test]
    fn resolve_trims_whitespace_and_canonicalizes_specials() {
        let cat = InMemoryCatalog::new(vec![entry("A", "constructor", "a.sol", 1)]);
        assert!(matches!(cat.resolve("  A.Constructor  "), ResolveOutcome::Matched(_)));
    }

    #[test]
    fn resolve_ambiguous_picks_deterministic_first_by_path_then_line() {
        let cat = InMemoryCatalog::new(vec![
            entry("A", "f", "b.sol", 10),
            entry("A", "f", "a.sol", 2),
        ]);
        match cat.resolve("A.f") {
            ResolveOutcome::Ambiguous(e) => assert_eq!(e.file_path, PathBuf::from("a.sol")),
            other => panic!("expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn resolve_missing_for_unknown_ref() {
        let cat = InMemoryCatalog::new(vec![entry("A", "f", "a.sol", 1)]);
        assert_eq!(cat.resolve("B.g"), ResolveOutcome::Missing);
    }
}
