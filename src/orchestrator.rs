//! The workflow orchestrator.
//!
//! This module provides [`Orchestrator`], the state machine that walks a
//! [`StageCatalog`] one stage at a time:
//!
//! ```text
//! Idle ──start──▶ Running ──checkpoint──▶ SuspendedForDecision
//!                   │  ▲                      │          │
//!                   │  └─────── approved ─────┘      rejected
//!                   │                                    ▼
//!                   ├──── last stage ──▶ Completed   Terminated
//!                   └──── executor error ──▶ Failed
//! ```
//!
//! Any state returns to `Idle` through [`Orchestrator::reset`].
//!
//! The drive loop runs as a spawned Tokio task. All run state lives behind
//! one mutex, and every write coming from the drive task or from an
//! [`ExecutionContext`] carries the generation it was started under. `start`
//! and `reset` bump the generation, so writes from a discarded run are
//! dropped instead of leaking into the fresh one.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};

use crate::status::PipelineStatus;
use crate::{
    AuditEntry, AuditLevel, AuditLog, Decision, DecisionRecord, DecisionSources, DecisionSummary,
    ExecutionContext, ExecutionSink, LoanflowError, Result, RunStatus, SimulatedExecutor, Stage,
    StageCatalog, StageExecutor, StageKind, StagePayload, StageResults, WorkflowEvent, WorkflowRun,
};

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pause between one stage completing and the next one starting.
    #[serde(with = "millis")]
    pub inter_stage_delay: Duration,

    /// Reviewer label recorded with every decision.
    pub reviewer: String,

    /// Assessment confidence above which the checkpoint logs a
    /// high-confidence note. The checkpoint suspends regardless.
    pub confidence_threshold: f64,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,

    /// Stages feeding the decision summary.
    pub sources: DecisionSources,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inter_stage_delay: Duration::from_millis(500),
            reviewer: "Loan Officer".to_string(),
            confidence_threshold: 0.85,
            event_capacity: 256,
            sources: DecisionSources::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Parses a configuration from JSON. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::Serialization`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Mutable state guarded by the orchestrator's lock.
#[derive(Debug)]
struct RunState {
    run: WorkflowRun,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// State shared between the orchestrator handle and its drive task.
#[derive(Debug)]
struct Shared {
    catalog: StageCatalog,
    executor: Arc<dyn StageExecutor>,
    config: OrchestratorConfig,
    state: Mutex<RunState>,
    audit: AuditLog,
    event_tx: broadcast::Sender<WorkflowEvent>,
    status_tx: watch::Sender<RunStatus>,
}

/// What the drive loop does after a stage completes.
enum Step {
    Next(String),
    Finished,
    Discarded,
}

/// Drives a [`StageCatalog`] through a [`StageExecutor`], suspending at the
/// checkpoint for a human decision.
///
/// Commands must be issued from within a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// use loanflow::{Decision, Orchestrator, RunStatus, StageCatalog};
///
/// # async fn example() -> loanflow::Result<()> {
/// let orchestrator = Orchestrator::simulated(StageCatalog::loan_origination());
///
/// orchestrator.start()?;
/// assert_eq!(orchestrator.wait_until_settled().await, RunStatus::SuspendedForDecision);
///
/// if let Some(summary) = orchestrator.decision_summary() {
///     println!("{} asks for {}", summary.applicant_name, summary.requested_amount);
/// }
///
/// orchestrator.resolve_decision(Decision::Approved)?;
/// assert_eq!(orchestrator.wait_until_settled().await, RunStatus::Completed);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default configuration.
    pub fn new(catalog: StageCatalog, executor: Arc<dyn StageExecutor>) -> Self {
        Self::with_config(catalog, executor, OrchestratorConfig::default())
    }

    /// Creates an orchestrator backed by the [`SimulatedExecutor`].
    pub fn simulated(catalog: StageCatalog) -> Self {
        Self::new(catalog, Arc::new(SimulatedExecutor::new()))
    }

    /// Creates an orchestrator with an explicit configuration.
    pub fn with_config(
        catalog: StageCatalog,
        executor: Arc<dyn StageExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (status_tx, _) = watch::channel(RunStatus::Idle);
        Self {
            shared: Arc::new(Shared {
                catalog,
                executor,
                config,
                state: Mutex::new(RunState {
                    run: WorkflowRun::new(),
                    generation: 0,
                    task: None,
                }),
                audit: AuditLog::new(),
                event_tx,
                status_tx,
            }),
        }
    }

    /// Starts a new run at the first stage of the catalog.
    ///
    /// Clears the results, progress and audit log of any previous run.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::AlreadyRunning`] if a run is `Running` or
    /// `SuspendedForDecision`.
    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let status = state.run.status();
        if status.is_active() {
            return Err(LoanflowError::AlreadyRunning { status });
        }

        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        state.run.begin();
        shared.audit.clear();
        shared
            .audit
            .info("Initializing agentic workflow execution...");
        shared.emit(WorkflowEvent::RunStarted { generation });
        shared.publish_status(&state);

        let first = shared.catalog.first().id.clone();
        state.task = Some(tokio::spawn(drive(Arc::clone(shared), generation, first, false)));
        Ok(())
    }

    /// Records a decision for the pending checkpoint.
    ///
    /// An approval resumes the drive loop at the stage after the
    /// checkpoint; a rejection terminates the run.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::NoPendingDecision`] if the run is not
    /// `SuspendedForDecision`. The run is left unchanged.
    pub fn resolve_decision(&self, decision: Decision) -> Result<()> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let status = state.run.status();
        let Some(checkpoint_id) = state
            .run
            .pending_checkpoint_id()
            .filter(|_| status == RunStatus::SuspendedForDecision)
            .map(str::to_string)
        else {
            return Err(LoanflowError::NoPendingDecision { status });
        };

        let generation = state.generation;
        let record = DecisionRecord::new(decision, shared.config.reviewer.clone());
        let payload = decision_payload(shared.summary(state.run.results()), &record);

        shared
            .audit
            .info(format!("Human review {decision}: {checkpoint_id}"));
        state.run.record_decision(record, payload);
        shared.emit(WorkflowEvent::DecisionRecorded {
            generation,
            stage: checkpoint_id.clone(),
            decision,
        });

        match decision {
            Decision::Approved => match shared.catalog.next(&checkpoint_id) {
                Some(next) => {
                    let next = next.to_string();
                    shared
                        .audit
                        .success(format!("Loan approved - proceeding to {next}"));
                    shared.audit.info(format!("Resuming workflow: {next}"));
                    shared.publish_status(&state);
                    state.task = Some(tokio::spawn(drive(Arc::clone(shared), generation, next, true)));
                }
                None => shared.finish_locked(&mut state),
            },
            Decision::Rejected => {
                shared.audit.error("Loan rejected - workflow terminated");
                shared.emit(WorkflowEvent::RunTerminated { generation });
                shared.publish_status(&state);
            }
        }
        Ok(())
    }

    /// Discards the current run and returns to `Idle`.
    ///
    /// Any in-flight stage execution is cancelled, and late progress or
    /// results from it are ignored.
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.generation += 1;
        state.run = WorkflowRun::new();
        shared.audit.clear();
        debug!(generation = state.generation, "orchestrator reset");
        shared.emit(WorkflowEvent::RunReset {
            generation: state.generation,
        });
        shared.publish_status(&state);
    }

    /// Waits until the run is no longer `Running` and returns its status.
    pub async fn wait_until_settled(&self) -> RunStatus {
        let mut rx = self.shared.status_tx.subscribe();
        let settled = rx
            .wait_for(|status| *status != RunStatus::Running)
            .await
            .map(|status| *status);
        // The sender lives as long as `self`, so the channel cannot close here.
        settled.unwrap_or_else(|_| self.status())
    }

    /// Subscribes to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Subscribes to status changes.
    pub fn watch_status(&self) -> watch::Receiver<RunStatus> {
        self.shared.status_tx.subscribe()
    }

    /// The stage catalog.
    pub fn catalog(&self) -> &StageCatalog {
        &self.shared.catalog
    }

    /// The configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Current run status.
    pub fn status(&self) -> RunStatus {
        self.shared.state.lock().run.status()
    }

    /// The stage actively executing, if any.
    pub fn current_stage_id(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .run
            .current_stage_id()
            .map(str::to_string)
    }

    /// The checkpoint awaiting a decision, if any.
    pub fn pending_checkpoint_id(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .run
            .pending_checkpoint_id()
            .map(str::to_string)
    }

    /// Completed stage ids, in completion order.
    pub fn completed_stage_ids(&self) -> Vec<String> {
        self.shared.state.lock().run.completed_stage_ids().to_vec()
    }

    /// Progress of a stage.
    pub fn progress(&self, stage_id: &str) -> Option<f64> {
        self.shared.state.lock().run.progress(stage_id)
    }

    /// The result of a stage.
    pub fn result(&self, stage_id: &str) -> Option<StagePayload> {
        self.shared.state.lock().run.result(stage_id).cloned()
    }

    /// All stage results.
    pub fn results(&self) -> StageResults {
        self.shared.state.lock().run.results().clone()
    }

    /// The decision summary, only while `SuspendedForDecision`.
    pub fn decision_summary(&self) -> Option<DecisionSummary> {
        let state = self.shared.state.lock();
        (state.run.status() == RunStatus::SuspendedForDecision)
            .then(|| self.shared.summary(state.run.results()))
    }

    /// A snapshot of the audit log.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.shared.audit.entries()
    }

    /// A snapshot of the whole run.
    pub fn snapshot(&self) -> WorkflowRun {
        self.shared.state.lock().run.clone()
    }

    /// The generation of the current run. Bumped by `start` and `reset`.
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// A per-stage status report of the current run.
    pub fn pipeline_status(&self) -> PipelineStatus {
        let run = self.snapshot();
        PipelineStatus::from_run(&self.shared.catalog, &run)
    }
}

impl Shared {
    fn emit(&self, event: WorkflowEvent) {
        let _ = self.event_tx.send(event);
    }

    fn publish_status(&self, state: &RunState) {
        self.status_tx.send_replace(state.run.status());
    }

    fn summary(&self, results: &StageResults) -> DecisionSummary {
        DecisionSummary::project_with(results, &self.config.sources)
    }

    /// Marks `stage` as active. Returns the prior results for the executor,
    /// or `None` if the run was discarded.
    ///
    /// A resumed stage was already announced by `resolve_decision`.
    fn enter_stage(&self, generation: u64, stage: &Stage, resumed: bool) -> Option<StageResults> {
        let mut state = self.state.lock();
        if state.generation != generation {
            return None;
        }
        state.run.enter_stage(&stage.id);
        if !resumed {
            self.audit.info(format!("Starting step: {}", stage.id));
        }
        self.emit(WorkflowEvent::StageStarted {
            generation,
            stage: stage.id.clone(),
        });
        Some(state.run.results().clone())
    }

    fn complete_stage(&self, generation: u64, stage: &Stage, payload: StagePayload) -> Step {
        let mut state = self.state.lock();
        if state.generation != generation
            || state.run.current_stage_id() != Some(stage.id.as_str())
        {
            return Step::Discarded;
        }
        state.run.complete_stage(&stage.id, payload);
        self.audit.success(format!("Completed step: {}", stage.id));
        self.emit(WorkflowEvent::StageCompleted {
            generation,
            stage: stage.id.clone(),
        });

        match self.catalog.next(&stage.id) {
            Some(next) => Step::Next(next.to_string()),
            None => {
                self.finish_locked(&mut state);
                Step::Finished
            }
        }
    }

    fn finish_locked(&self, state: &mut RunState) {
        state.run.finish();
        self.audit.success("Agentic workflow completed successfully!");
        self.emit(WorkflowEvent::RunCompleted {
            generation: state.generation,
        });
        self.publish_status(state);
    }

    fn suspend(&self, generation: u64, checkpoint: &Stage) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let summary = self.summary(state.run.results());
        if summary.is_high_confidence(self.config.confidence_threshold) {
            self.audit
                .info("High confidence score - but flagging for manual review");
        }
        state.run.suspend(&checkpoint.id);
        self.audit.warning("Workflow paused - Human review required");
        self.emit(WorkflowEvent::DecisionRequired {
            generation,
            stage: checkpoint.id.clone(),
            summary: Box::new(summary),
        });
        self.publish_status(&state);
    }

    fn fail(&self, generation: u64, stage_id: &str, error: &LoanflowError) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let reason = match error {
            LoanflowError::StageExecution { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        state.run.fail(stage_id, reason.clone());
        self.audit.error(format!("Workflow failed: {reason}"));
        self.emit(WorkflowEvent::StageFailed {
            generation,
            stage: stage_id.to_string(),
            error: reason,
        });
        self.publish_status(&state);
    }
}

impl ExecutionSink for Shared {
    fn is_live(&self, generation: u64, stage_id: &str) -> bool {
        let state = self.state.lock();
        state.generation == generation && state.run.current_stage_id() == Some(stage_id)
    }

    fn record_progress(&self, generation: u64, stage_id: &str, progress: f64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        let Some(stored) = state.run.set_progress(stage_id, progress) else {
            return false;
        };
        self.emit(WorkflowEvent::StageProgress {
            generation,
            stage: stage_id.to_string(),
            progress: stored,
        });
        true
    }

    fn record_audit(&self, generation: u64, stage_id: &str, level: AuditLevel, message: String) -> bool {
        let state = self.state.lock();
        if state.generation != generation || state.run.current_stage_id() != Some(stage_id) {
            return false;
        }
        self.audit.record(level, message);
        true
    }
}

/// Builds the checkpoint's result: the summary fields plus the decision.
fn decision_payload(summary: DecisionSummary, record: &DecisionRecord) -> StagePayload {
    let mut payload = summary.to_payload();
    if let Value::Object(map) = &mut payload {
        map.insert("decision".to_string(), Value::String(record.decision.to_string()));
        map.insert("reviewer".to_string(), Value::String(record.reviewer.clone()));
        map.insert(
            "timestamp".to_string(),
            Value::String(record.decided_at.to_rfc3339()),
        );
    }
    payload
}

/// Describes a panic payload caught from an executor.
fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("executor panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("executor panicked: {message}")
    } else {
        "executor panicked".to_string()
    }
}

/// The drive loop: executes stages from `from` onwards until the checkpoint,
/// the end of the catalog, a failure, or the run being discarded.
///
/// `resumed` is set when `from` follows an approved checkpoint.
async fn drive(shared: Arc<Shared>, generation: u64, from: String, resumed: bool) {
    let span = info_span!("run", generation);
    async move {
        let mut next = Some(from);
        let mut resumed = resumed;
        while let Some(stage_id) = next.take() {
            let Some(stage) = shared.catalog.get(&stage_id) else {
                let error = LoanflowError::StageNotFound(stage_id.clone());
                shared.fail(generation, &stage_id, &error);
                return;
            };

            match stage.kind {
                StageKind::Checkpoint => {
                    shared.suspend(generation, stage);
                    return;
                }
                StageKind::Trigger | StageKind::Automated => {
                    let Some(prior) = shared.enter_stage(generation, stage, resumed) else {
                        return;
                    };
                    resumed = false;

                    let sink: Arc<dyn ExecutionSink> = shared.clone();
                    let mut ctx = ExecutionContext::new(stage.id.clone(), generation, sink);
                    // A panicking executor fails the run like any other error.
                    let outcome = AssertUnwindSafe(shared.executor.execute(stage, &prior, &mut ctx))
                        .catch_unwind()
                        .instrument(info_span!("stage", stage = %stage.id))
                        .await
                        .unwrap_or_else(|payload| {
                            Err(LoanflowError::stage_execution(&stage.id, panic_reason(payload)))
                        });

                    match outcome {
                        Ok(payload) => match shared.complete_stage(generation, stage, payload) {
                            Step::Next(id) => next = Some(id),
                            Step::Finished | Step::Discarded => return,
                        },
                        Err(error) => {
                            warn!(stage = %stage.id, error = %error, "stage failed");
                            shared.fail(generation, &stage.id, &error);
                            return;
                        }
                    }
                }
            }

            if next.is_some() && !shared.config.inter_stage_delay.is_zero() {
                tokio::time::sleep(shared.config.inter_stage_delay).await;
            }
        }
    }
    .instrument(span)
    .await;
}
