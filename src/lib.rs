//! # Loanflow
//!
//! A stage orchestrator for loan origination with a human-in-the-loop
//! checkpoint.
//!
//! A run walks a fixed, ordered [`StageCatalog`] one stage at a time. Each
//! automated stage is handed to a [`StageExecutor`], which reports progress
//! and produces a JSON payload. When the run reaches the checkpoint it
//! suspends, projects a [`DecisionSummary`] from the earlier results, and
//! waits for a reviewer to approve or reject. Approval resumes the run;
//! rejection terminates it. Every transition is appended to an
//! [`AuditLog`] and broadcast as a [`WorkflowEvent`].
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use loanflow::{Decision, Orchestrator, RunStatus, StageCatalog};
//!
//! # async fn example() -> loanflow::Result<()> {
//! let orchestrator = Orchestrator::simulated(StageCatalog::loan_origination());
//!
//! orchestrator.start()?;
//! if orchestrator.wait_until_settled().await == RunStatus::SuspendedForDecision {
//!     orchestrator.resolve_decision(Decision::Approved)?;
//! }
//! assert_eq!(orchestrator.wait_until_settled().await, RunStatus::Completed);
//!
//! for entry in orchestrator.audit_log() {
//!     println!("{entry}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A run is discarded with [`Orchestrator::reset`]. Late progress or
//! results from a discarded run never reach the next one: every report is
//! tagged with the generation it was started under.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

pub mod audit;
pub mod catalog;
pub mod decision;
pub mod error;
pub mod event;
pub mod executor;
pub mod orchestrator;
pub mod run;
pub mod stage;
pub mod status;

pub use audit::{AuditEntry, AuditLevel, AuditLog};
pub use catalog::{CatalogBuilder, CatalogConfig, StageCatalog, StageConfig};
pub use decision::{DecisionSources, DecisionSummary};
pub use error::{LoanflowError, Result};
pub use event::WorkflowEvent;
pub use executor::{ExecutionContext, ExecutionSink, SimulatedExecutor, StageExecutor};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use run::{Decision, DecisionRecord, RunStatus, StageFailure, WorkflowRun};
pub use stage::{AgentProfile, ExecutorProfile, Stage, StageKind, StagePayload, StageResults};
pub use status::{PipelineStatus, StageState, StageStatusEntry};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_returns_valid_semver() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
