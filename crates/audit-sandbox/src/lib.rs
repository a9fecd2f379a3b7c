//! Concrete leaves behind `audit-core`'s `AgentExecutor`/`WorkspaceResolver`
//! contracts: a sandboxed subprocess executor and a manifest-backed resolver.

pub mod executor;
pub mod workspace;

pub use executor::ProcessAgentExecutor;
pub use workspace::ManifestWorkspaceResolver;
