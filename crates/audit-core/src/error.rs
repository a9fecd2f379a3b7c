//! Error taxonomy for the audit pipeline.
//!
//! Every fallible boundary in the pipeline returns one of these variants;
//! see spec §7 for the propagation policy each variant implies.

use thiserror::Error;

/// Result type alias used throughout `audit-core`.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Top-level error type for the audit pipeline.
#[derive(Error, Debug)]
pub enum AuditError {
    /// `workspace_root` could not be resolved or escapes `dataset_base` (I6).
    #[error("workspace error: {0}")]
    Workspace(String),

    /// Tree-sitter derived catalog data was malformed or inconsistent.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Inputs required to assemble a prompt were missing or too large.
    #[error("prompt assembly error: {0}")]
    PromptAssembly(String),

    /// The external agent exited non-zero or failed to spawn/communicate.
    #[error("agent execution error: {0}")]
    Exec(String),

    /// The external agent did not complete within its deadline.
    #[error("agent timeout after {elapsed_sec}s (limit {limit_sec}s)")]
    Timeout { elapsed_sec: u64, limit_sec: u64 },

    /// The agent's output did not conform to the expected JSON schema.
    #[error("parse error: {0}")]
    Parse(String),

    /// The durable store failed to read or write.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A referenced row (Task/Finding) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The driver's cancellation token was triggered.
    #[error("operation cancelled")]
    Cancel,

    /// Catch-all for I/O failures reaching the boundary.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure outside the agent-response parse path.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuditError {
    /// True for errors that should abort only the current project (I6/§7).
    pub fn is_project_scoped(&self) -> bool {
        matches!(self, AuditError::Workspace(_))
    }
}
