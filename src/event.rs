//! Workflow execution events.
//!
//! This module provides [`WorkflowEvent`] for observing a run as it
//! happens. Events are broadcast through a channel that can be subscribed
//! to via [`Orchestrator::subscribe`](crate::Orchestrator::subscribe).
//! Unlike the audit log, events are not retained: a lagging receiver may
//! miss some.

use crate::{Decision, DecisionSummary, RunStatus};

/// An event emitted during a run.
///
/// Every event carries the generation of the run that produced it, so
/// observers can discard events from a run that has since been reset.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum WorkflowEvent {
    /// A new run was started.
    RunStarted {
        /// Run generation.
        generation: u64,
    },

    /// A stage has started executing.
    StageStarted {
        /// Run generation.
        generation: u64,
        /// The stage id.
        stage: String,
    },

    /// The active stage reported progress.
    StageProgress {
        /// Run generation.
        generation: u64,
        /// The stage id.
        stage: String,
        /// Progress in `[0, 1]`.
        progress: f64,
    },

    /// A stage completed and its result was stored.
    StageCompleted {
        /// Run generation.
        generation: u64,
        /// The stage id.
        stage: String,
    },

    /// A stage executor failed. The run is now `Failed`.
    StageFailed {
        /// Run generation.
        generation: u64,
        /// The stage id.
        stage: String,
        /// Error message describing the failure.
        error: String,
    },

    /// The run suspended at the checkpoint.
    DecisionRequired {
        /// Run generation.
        generation: u64,
        /// The checkpoint stage id.
        stage: String,
        /// Summary for the reviewer.
        summary: Box<DecisionSummary>,
    },

    /// A decision was recorded at the checkpoint.
    DecisionRecorded {
        /// Run generation.
        generation: u64,
        /// The checkpoint stage id.
        stage: String,
        /// The decision taken.
        decision: Decision,
    },

    /// Every stage completed.
    RunCompleted {
        /// Run generation.
        generation: u64,
    },

    /// The run was terminated by a rejection.
    RunTerminated {
        /// Run generation.
        generation: u64,
    },

    /// The orchestrator was reset to idle.
    RunReset {
        /// Generation of the fresh, idle state.
        generation: u64,
    },
}

impl WorkflowEvent {
    /// Returns the generation of the run that emitted this event.
    pub fn generation(&self) -> u64 {
        match self {
            Self::RunStarted { generation }
            | Self::StageStarted { generation, .. }
            | Self::StageProgress { generation, .. }
            | Self::StageCompleted { generation, .. }
            | Self::StageFailed { generation, .. }
            | Self::DecisionRequired { generation, .. }
            | Self::DecisionRecorded { generation, .. }
            | Self::RunCompleted { generation }
            | Self::RunTerminated { generation }
            | Self::RunReset { generation } => *generation,
        }
    }

    /// Returns the stage id for this event, if applicable.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageStarted { stage, .. }
            | Self::StageProgress { stage, .. }
            | Self::StageCompleted { stage, .. }
            | Self::StageFailed { stage, .. }
            | Self::DecisionRequired { stage, .. }
            | Self::DecisionRecorded { stage, .. } => Some(stage),
            Self::RunStarted { .. }
            | Self::RunCompleted { .. }
            | Self::RunTerminated { .. }
            | Self::RunReset { .. } => None,
        }
    }

    /// Returns true if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::StageFailed { .. })
    }

    /// Returns the run status this event leaves behind, for events that
    /// change it.
    pub fn resulting_status(&self) -> Option<RunStatus> {
        match self {
            Self::RunStarted { .. } => Some(RunStatus::Running),
            Self::StageFailed { .. } => Some(RunStatus::Failed),
            Self::DecisionRequired { .. } => Some(RunStatus::SuspendedForDecision),
            Self::DecisionRecorded { decision, .. } => Some(match decision {
                Decision::Approved => RunStatus::Running,
                Decision::Rejected => RunStatus::Terminated,
            }),
            Self::RunCompleted { .. } => Some(RunStatus::Completed),
            Self::RunTerminated { .. } => Some(RunStatus::Terminated),
            Self::RunReset { .. } => Some(RunStatus::Idle),
            Self::StageStarted { .. }
            | Self::StageProgress { .. }
            | Self::StageCompleted { .. } => None,
        }
    }
}
