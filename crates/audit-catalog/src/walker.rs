//! Walks a project's workspace root, dispatches each source file to the
//! matching language extractor, and assembles an `InMemoryCatalog` (§4.2, C3).
//!
//! The FunctionCatalog is built once per project at planning start and is
//! immutable for the remainder of the run (§3 Lifecycle) — this builder has
//! no mutable state of its own beyond the directories it skips.

use crate::{extract_functions, SourceLanguage};
use audit_core::error::{AuditError, Result};
use audit_core::model::{CatalogBuilder, FunctionCatalog, InMemoryCatalog};
use std::path::Path;
use walkdir::WalkDir;

/// Directory names never descended into, regardless of depth — build
/// artifacts and dependency trees are never part of a project's catalog.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", ".git", "artifacts", "cache", "out", "lib"];

#[derive(Debug, Clone, Default)]
pub struct TreeSitterCatalogBuilder;

impl TreeSitterCatalogBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl CatalogBuilder for TreeSitterCatalogBuilder {
    fn build(&self, workspace_root: &Path) -> Result<Box<dyn FunctionCatalog>> {
        let mut entries = Vec::new();

        for candidate in WalkDir::new(workspace_root)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e))
        {
            let candidate = candidate
                .map_err(|e| AuditError::Catalog(format!("walking {}: {e}", workspace_root.display())))?;
            if !candidate.file_type().is_file() {
                continue;
            }

            let Some(lang) = classify_path(candidate.path()) else {
                continue;
            };

            let source = std::fs::read_to_string(candidate.path())
                .map_err(|e| AuditError::Catalog(format!("reading {}: {e}", candidate.path().display())))?;
            let relative = candidate
                .path()
                .strip_prefix(workspace_root)
                .unwrap_or(candidate.path());

            match extract_functions(lang, &source, relative) {
                Ok(found) => entries.extend(found),
                Err(err) => {
                    tracing::warn!(file = %relative.display(), error = %err, "skipping unparseable source file");
                }
            }
        }

        Ok(Box::new(InMemoryCatalog::new(entries)))
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name) || name.starts_with('.'))
            .unwrap_or(false)
}

fn classify_path(path: &Path) -> Option<SourceLanguage> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("sol") => Some(SourceLanguage::Solidity),
        Some("rs") => Some(SourceLanguage::Rust),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_catalog_from_a_mixed_solidity_project() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("Vault.sol"),
            "contract Vault { function withdraw() public { send(); } function send() internal {} }",
        )
        .unwrap();
        std::fs::create_dir(tmp.path().join("node_modules")).unwrap();
        std::fs::write(tmp.path().join("node_modules/Ignored.sol"), "contract Ignored { function x() public {} }")
            .unwrap();

        let builder = TreeSitterCatalogBuilder::new();
        let catalog = builder.build(tmp.path()).unwrap();

        let refs: Vec<String> = catalog.list().iter().map(|e| e.canonical_ref()).collect();
        assert!(refs.contains(&"Vault.withdraw".to_string()));
        assert!(refs.contains(&"Vault.send".to_string()));
        assert!(!refs.iter().any(|r| r.contains("Ignored")));
    }
}
