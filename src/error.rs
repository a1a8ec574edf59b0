//! Error types for the loanflow orchestrator.
//!
//! Command errors ([`LoanflowError::AlreadyRunning`],
//! [`LoanflowError::NoPendingDecision`]) are returned synchronously to the
//! caller. Stage failures raised inside the drive loop surface as
//! [`LoanflowError::StageExecution`] in the audit log and a terminal
//! `Failed` run status.

use thiserror::Error;

use crate::RunStatus;

/// The main error type for loanflow operations.
///
/// This enum uses `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking backward compatibility.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoanflowError {
    /// `start` was called while a run is still in flight.
    #[error("Workflow already running (status: {status})")]
    AlreadyRunning {
        /// The status observed when the command was rejected.
        status: RunStatus,
    },

    /// `resolve_decision` was called without a checkpoint awaiting a decision.
    #[error("No pending decision (status: {status})")]
    NoPendingDecision {
        /// The status observed when the command was rejected.
        status: RunStatus,
    },

    /// A stage executor reported a failure.
    #[error("Stage execution error in {stage}: {reason}")]
    StageExecution {
        /// The stage that failed.
        stage: String,
        /// The failure reason reported by the executor.
        reason: String,
    },

    /// The stage catalog violates a structural rule.
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// A decision value could not be parsed.
    #[error("Invalid decision: {0} (expected \"approved\" or \"rejected\")")]
    InvalidDecision(String),

    /// Stage not found in the catalog.
    #[error("Stage not found: {0}")]
    StageNotFound(String),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoanflowError {
    /// Creates a [`LoanflowError::StageExecution`] for the given stage.
    pub fn stage_execution(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageExecution {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for loanflow operations.
pub type Result<T> = std::result::Result<T, LoanflowError>;
