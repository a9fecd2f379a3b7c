//! Data model (§3): Project, FunctionEntry/FunctionCatalog, Group/Flow, Task, Finding.

pub mod catalog;
pub mod finding;
pub mod flow;
pub mod project;
pub mod task;

pub use catalog::{CatalogBuilder, FunctionCatalog, FunctionEntry, InMemoryCatalog, ResolveOutcome, Visibility};
pub use finding::{DedupStatus, Finding, FindingDraft, ValidationStatus};
pub use flow::{Flow, Group, IdAllocator, RefStatus};
pub use project::Project;
pub use task::{NewTask, ShortResult, Task};
