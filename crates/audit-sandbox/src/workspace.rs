//! Manifest-backed `WorkspaceResolver` (§4.1, C2).

use audit_core::error::{AuditError, Result};
use audit_core::model::Project;
use audit_core::workspace::WorkspaceResolver;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    path: String,
}

/// Dataset manifest: `{"<project_id>": {"path": "<relative_dir>"}, ...}` (§6).
pub struct ManifestWorkspaceResolver {
    dataset_base: PathBuf,
    entries: HashMap<String, ManifestEntry>,
}

impl ManifestWorkspaceResolver {
    /// Load and parse the manifest file at `manifest_path`. `dataset_base`
    /// is canonicalized once here; every `resolve` call is checked against it.
    pub fn load(dataset_base: PathBuf, manifest_path: &Path) -> Result<Self> {
        let dataset_base = dataset_base
            .canonicalize()
            .map_err(|e| AuditError::Workspace(format!("dataset_base {}: {e}", dataset_base.display())))?;
        let raw = std::fs::read_to_string(manifest_path)
            .map_err(|e| AuditError::Workspace(format!("reading manifest {}: {e}", manifest_path.display())))?;
        let entries: HashMap<String, ManifestEntry> = serde_json::from_str(&raw)
            .map_err(|e| AuditError::Workspace(format!("parsing manifest {}: {e}", manifest_path.display())))?;
        Ok(Self { dataset_base, entries })
    }
}

impl WorkspaceResolver for ManifestWorkspaceResolver {
    fn resolve(&self, project_id: &str) -> Result<Project> {
        let entry = self
            .entries
            .get(project_id)
            .ok_or_else(|| AuditError::Workspace(format!("unknown project_id: {project_id}")))?;

        let joined = self.dataset_base.join(&entry.path);
        let canonical = joined
            .canonicalize()
            .map_err(|e| AuditError::Workspace(format!("{}: {e}", joined.display())))?;

        if !canonical.is_dir() {
            return Err(AuditError::Workspace(format!("{} is not a directory", canonical.display())));
        }
        if !audit_core::agent::assert_contained(&canonical, &self.dataset_base) {
            return Err(AuditError::Workspace(format!(
                "{} escapes dataset_base {}",
                canonical.display(),
                self.dataset_base.display()
            )));
        }

        Ok(Project::new(project_id, canonical))
    }

    fn list_project_ids(&self) -> Result<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_contained_project() {
        let tmp = tempfile::tempdir().unwrap();
        let project_dir = tmp.path().join("p1");
        std::fs::create_dir(&project_dir).unwrap();

        let manifest_path = tmp.path().join("manifest.json");
        std::fs::write(&manifest_path, r#"{"p1": {"path": "p1"}}"#).unwrap();

        let resolver = ManifestWorkspaceResolver::load(tmp.path().to_path_buf(), &manifest_path).unwrap();
        let project = resolver.resolve("p1").unwrap();
        assert_eq!(project.project_id, "p1");
        assert!(project.workspace_root.ends_with("p1"));
    }

    #[test]
    fn rejects_escaping_path() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("p1")).unwrap();

        let manifest_path = tmp.path().join("manifest.json");
        std::fs::write(&manifest_path, r#"{"p1": {"path": "../../../etc"}}"#).unwrap();

        let resolver = ManifestWorkspaceResolver::load(tmp.path().to_path_buf(), &manifest_path).unwrap();
        assert!(resolver.resolve("p1").is_err());
    }

    #[test]
    fn unknown_project_id_is_a_workspace_error() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest_path = tmp.path().join("manifest.json");
        std::fs::write(&manifest_path, r#"{}"#).unwrap();

        let resolver = ManifestWorkspaceResolver::load(tmp.path().to_path_buf(), &manifest_path).unwrap();
        assert!(resolver.resolve("ghost").is_err());
    }
}
