//! Core orchestration engine for the smart-contract audit pipeline:
//! planning, reasoning, validation, and durable storage.
//!
//! This crate defines the contracts (`AgentExecutor`, `WorkspaceResolver`,
//! `FunctionCatalog`/`CatalogBuilder`) that external leaves implement, and
//! owns every stateful orchestration component that sits above them
//! (`PlanningEngine`, `ReasoningLoop`, `Validator`, `PipelineDriver`, `Store`).

pub mod agent;
pub mod config;
pub mod driver;
pub mod error;
pub mod model;
pub mod planning;
pub mod reasoning;
pub mod store;
pub mod validation;
pub mod workspace;

pub use agent::{AgentCallResult, AgentExecutor, AgentInvocation, AgentOutcome, SandboxMode};
pub use config::{ConfigOverrides, PipelineConfig};
pub use driver::{PipelineDriver, ProjectReport, RunReport, Stage};
pub use error::{AuditError, Result};
pub use planning::{PlanningEngine, PlanningSummary};
pub use reasoning::{ReasoningLoop, ReasoningOutcome};
pub use store::{SqliteStore, Store};
pub use validation::{Validator, ValidationSummary};
pub use workspace::WorkspaceResolver;
