//! WorkspaceResolver contract (§4.1, C2).
//!
//! The concrete manifest-backed implementation lives in `audit-sandbox`;
//! this crate only defines the contract `PipelineDriver` depends on.

use crate::model::Project;
use crate::error::Result;

/// Resolves a `project_id` to a canonical, validated `workspace_root` (I6).
/// No writes; every implementation must guarantee the returned path exists,
/// is a directory, and is a prefix-descendant of `dataset_base`.
pub trait WorkspaceResolver: Send + Sync {
    fn resolve(&self, project_id: &str) -> Result<Project>;

    /// All project IDs known to the dataset manifest, in manifest order.
    fn list_project_ids(&self) -> Result<Vec<String>>;
}
