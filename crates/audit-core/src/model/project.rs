//! Project identity (§3 Entities: Project).

use std::path::PathBuf;

/// A single project under audit. Immutable once constructed — the workspace
/// root is resolved once by `WorkspaceResolver` and never touched again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub workspace_root: PathBuf,
}

impl Project {
    pub fn new(project_id: impl Into<String>, workspace_root: PathBuf) -> Self {
        Self {
            project_id: project_id.into(),
            workspace_root,
        }
    }
}
