//! The mutable state of a single pipeline traversal.
//!
//! [`WorkflowRun`] is owned by the [`Orchestrator`](crate::Orchestrator).
//! Observers only ever receive clones of it. Its mutators keep three
//! invariants intact:
//!
//! - a stage id is in `completed_stage_ids` iff `results` has an entry for it
//! - at most one of `current_stage_id` / `pending_checkpoint_id` is set
//! - `status == SuspendedForDecision` iff `pending_checkpoint_id` is set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::{LoanflowError, StagePayload, StageResults};

/// The lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No run has started, or the last one was reset.
    Idle,

    /// Stages are being executed.
    Running,

    /// Halted at the checkpoint awaiting a decision.
    SuspendedForDecision,

    /// Every stage completed.
    Completed,

    /// The decision was a rejection.
    Terminated,

    /// A stage executor failed.
    Failed,
}

impl RunStatus {
    /// Returns true for statuses that only `reset` can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated | Self::Failed)
    }

    /// Returns true while a run is in flight (running or suspended).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::SuspendedForDecision)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::SuspendedForDecision => "suspended_for_decision",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A human decision at the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Continue the pipeline past the checkpoint.
    Approved,

    /// Terminate the run.
    Rejected,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

impl FromStr for Decision {
    type Err = LoanflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(LoanflowError::InvalidDecision(other.to_string())),
        }
    }
}

/// Who decided what, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// The decision taken.
    pub decision: Decision,

    /// Reviewer label.
    pub reviewer: String,

    /// When the decision was recorded.
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// Creates a record stamped with the current time.
    pub fn new(decision: Decision, reviewer: impl Into<String>) -> Self {
        Self {
            decision,
            reviewer: reviewer.into(),
            decided_at: Utc::now(),
        }
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    /// The stage whose executor failed.
    pub stage_id: String,

    /// The failure reason.
    pub reason: String,
}

/// One traversal of the stage catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    status: RunStatus,
    current_stage_id: Option<String>,
    completed_stage_ids: Vec<String>,
    results: StageResults,
    progress_by_stage: HashMap<String, f64>,
    pending_checkpoint_id: Option<String>,
    decision: Option<DecisionRecord>,
    failure: Option<StageFailure>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Creates an idle run with empty maps.
    pub fn new() -> Self {
        Self {
            status: RunStatus::Idle,
            current_stage_id: None,
            completed_stage_ids: Vec::new(),
            results: StageResults::new(),
            progress_by_stage: HashMap::new(),
            pending_checkpoint_id: None,
            decision: None,
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// The stage actively executing, if any.
    pub fn current_stage_id(&self) -> Option<&str> {
        self.current_stage_id.as_deref()
    }

    /// Completed stage ids, in completion order.
    pub fn completed_stage_ids(&self) -> &[String] {
        &self.completed_stage_ids
    }

    /// Returns true if the stage has completed.
    pub fn is_completed(&self, stage_id: &str) -> bool {
        self.completed_stage_ids.iter().any(|id| id == stage_id)
    }

    /// All stage results.
    pub fn results(&self) -> &StageResults {
        &self.results
    }

    /// The result of one stage.
    pub fn result(&self, stage_id: &str) -> Option<&StagePayload> {
        self.results.get(stage_id)
    }

    /// Progress of a stage in `[0, 1]`.
    pub fn progress(&self, stage_id: &str) -> Option<f64> {
        self.progress_by_stage.get(stage_id).copied()
    }

    /// The checkpoint awaiting a decision, if suspended.
    pub fn pending_checkpoint_id(&self) -> Option<&str> {
        self.pending_checkpoint_id.as_deref()
    }

    /// The recorded checkpoint decision.
    pub fn decision(&self) -> Option<&DecisionRecord> {
        self.decision.as_ref()
    }

    /// The failure that halted the run.
    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    /// When the run started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the run reached a terminal status.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Checks the structural invariants, describing the first violation.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated invariant.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for id in &self.completed_stage_ids {
            if !self.results.contains_key(id) {
                return Err(format!("completed stage '{id}' has no result"));
            }
        }
        for id in self.results.keys() {
            if !self.is_completed(id) {
                return Err(format!("result for '{id}' without completion"));
            }
        }
        if self.current_stage_id.is_some() && self.pending_checkpoint_id.is_some() {
            return Err("both a current stage and a pending checkpoint are set".to_string());
        }
        let suspended = self.status == RunStatus::SuspendedForDecision;
        if suspended != self.pending_checkpoint_id.is_some() {
            return Err(format!(
                "status {} disagrees with pending checkpoint {:?}",
                self.status, self.pending_checkpoint_id
            ));
        }
        for (id, value) in &self.progress_by_stage {
            if !(0.0..=1.0).contains(value) {
                return Err(format!("progress for '{id}' out of range: {value}"));
            }
        }
        Ok(())
    }

    /// Clears every map and marks the run as running.
    pub(crate) fn begin(&mut self) {
        *self = Self::new();
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks a stage as the one actively executing.
    pub(crate) fn enter_stage(&mut self, stage_id: &str) {
        self.current_stage_id = Some(stage_id.to_string());
        self.progress_by_stage.insert(stage_id.to_string(), 0.0);
    }

    /// Records a progress tick for the active stage.
    ///
    /// Ticks for any other stage are ignored. Values are clamped to
    /// `[0, 1]` and never move backwards. Returns the stored value.
    pub(crate) fn set_progress(&mut self, stage_id: &str, value: f64) -> Option<f64> {
        if self.current_stage_id.as_deref() != Some(stage_id) {
            return None;
        }
        let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
        let entry = self
            .progress_by_stage
            .entry(stage_id.to_string())
            .or_insert(0.0);
        *entry = entry.max(value);
        Some(*entry)
    }

    /// Stores a stage's result and marks it complete.
    ///
    /// Results are write-once; a second write for the same id is ignored.
    pub(crate) fn complete_stage(&mut self, stage_id: &str, payload: StagePayload) {
        if self.current_stage_id.as_deref() == Some(stage_id) {
            self.current_stage_id = None;
        }
        self.progress_by_stage.insert(stage_id.to_string(), 1.0);
        if !self.results.contains_key(stage_id) {
            self.results.insert(stage_id.to_string(), payload);
            self.completed_stage_ids.push(stage_id.to_string());
        }
    }

    /// Suspends at the checkpoint.
    pub(crate) fn suspend(&mut self, checkpoint_id: &str) {
        self.current_stage_id = None;
        self.pending_checkpoint_id = Some(checkpoint_id.to_string());
        self.status = RunStatus::SuspendedForDecision;
    }

    /// Records the decision into the checkpoint's result and leaves the
    /// suspended state. Returns the checkpoint id, or `None` if nothing
    /// was pending.
    pub(crate) fn record_decision(
        &mut self,
        record: DecisionRecord,
        payload: StagePayload,
    ) -> Option<String> {
        let checkpoint_id = self.pending_checkpoint_id.take()?;
        if !self.results.contains_key(&checkpoint_id) {
            self.results.insert(checkpoint_id.clone(), payload);
            self.completed_stage_ids.push(checkpoint_id.clone());
        }
        self.progress_by_stage.insert(checkpoint_id.clone(), 1.0);
        match record.decision {
            Decision::Approved => self.status = RunStatus::Running,
            Decision::Rejected => {
                self.status = RunStatus::Terminated;
                self.finished_at = Some(Utc::now());
            }
        }
        self.decision = Some(record);
        Some(checkpoint_id)
    }

    /// Marks the run as completed.
    pub(crate) fn finish(&mut self) {
        self.current_stage_id = None;
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the run as failed at the given stage.
    ///
    /// The stage's partial progress is discarded.
    pub(crate) fn fail(&mut self, stage_id: &str, reason: impl Into<String>) {
        if self.current_stage_id.as_deref() == Some(stage_id) {
            self.current_stage_id = None;
        }
        if !self.results.contains_key(stage_id) {
            self.progress_by_stage.remove(stage_id);
        }
        self.status = RunStatus::Failed;
        self.failure = Some(StageFailure {
            stage_id: stage_id.to_string(),
            reason: reason.into(),
        });
        self.finished_at = Some(Utc::now());
    }
}

impl Default for WorkflowRun {
    fn default() -> Self {
        Self::new()
    }
}
