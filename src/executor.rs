//! Stage execution.
//!
//! The orchestrator is agent-agnostic: it hands each non-checkpoint stage
//! to a [`StageExecutor`] together with an [`ExecutionContext`], awaits the
//! returned payload, and never interprets it. The context is the only way
//! an executor reports progress and audit activity back to the run, and
//! every report is tagged with the run generation so that reports from a
//! discarded run are dropped.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::{AuditLevel, Result, Stage, StagePayload, StageResults};

/// Default interval between progress ticks of the simulated executor.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Receiver of execution reports, implemented by the orchestrator.
///
/// Every method returns `false` when the report was discarded because the
/// generation or the active stage no longer matches.
pub trait ExecutionSink: Send + Sync {
    /// Returns true if `stage_id` is still the active stage of `generation`.
    fn is_live(&self, generation: u64, stage_id: &str) -> bool;

    /// Records a progress value for the active stage.
    fn record_progress(&self, generation: u64, stage_id: &str, progress: f64) -> bool;

    /// Appends an audit entry on behalf of the active stage.
    fn record_audit(&self, generation: u64, stage_id: &str, level: AuditLevel, message: String) -> bool;
}

/// Handle through which an executor reports on one stage execution.
#[derive(Clone)]
pub struct ExecutionContext {
    stage_id: String,
    generation: u64,
    sink: Arc<dyn ExecutionSink>,
    last_progress: f64,
}

impl ExecutionContext {
    /// Creates a context for one execution of `stage_id`.
    pub fn new(stage_id: impl Into<String>, generation: u64, sink: Arc<dyn ExecutionSink>) -> Self {
        Self {
            stage_id: stage_id.into(),
            generation,
            sink,
            last_progress: 0.0,
        }
    }

    /// The stage being executed.
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// The run generation this execution belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the execution has been discarded.
    pub fn is_live(&self) -> bool {
        self.sink.is_live(self.generation, &self.stage_id)
    }

    /// Reports progress in `[0, 1]`.
    ///
    /// Values are clamped, and a value lower than one already reported is
    /// raised to it. Returns false if the report was discarded.
    pub fn report_progress(&mut self, progress: f64) -> bool {
        let clamped = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.last_progress = self.last_progress.max(clamped);
        trace!(stage = %self.stage_id, progress = self.last_progress, "progress tick");
        self.sink
            .record_progress(self.generation, &self.stage_id, self.last_progress)
    }

    /// The highest progress value reported so far.
    pub fn last_progress(&self) -> f64 {
        self.last_progress
    }

    /// Appends an audit entry. Returns false if the entry was discarded.
    pub fn log(&self, level: AuditLevel, message: impl Into<String>) -> bool {
        self.sink
            .record_audit(self.generation, &self.stage_id, level, message.into())
    }
}

impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("stage_id", &self.stage_id)
            .field("generation", &self.generation)
            .field("last_progress", &self.last_progress)
            .finish()
    }
}

/// Performs the work of a stage.
///
/// The returned future is the execution: the orchestrator awaits it and
/// may drop it at any await point to cancel. Progress is streamed through
/// the context while the future runs.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use loanflow::{ExecutionContext, Result, Stage, StageExecutor, StagePayload, StageResults};
///
/// #[derive(Debug)]
/// struct Instant;
///
/// #[async_trait]
/// impl StageExecutor for Instant {
///     async fn execute(
///         &self,
///         stage: &Stage,
///         _prior: &StageResults,
///         ctx: &mut ExecutionContext,
///     ) -> Result<StagePayload> {
///         ctx.report_progress(1.0);
///         Ok(stage.profile.payload.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait StageExecutor: Debug + Send + Sync {
    /// Executes `stage`, given the results of every stage completed before it.
    ///
    /// # Errors
    ///
    /// Any error fails the run; it is reported as
    /// [`LoanflowError::StageExecution`](crate::LoanflowError::StageExecution).
    async fn execute(
        &self,
        stage: &Stage,
        prior: &StageResults,
        ctx: &mut ExecutionContext,
    ) -> Result<StagePayload>;
}

/// Fixed-duration simulation returning each stage's canned payload.
///
/// Progress advances by `tick / duration` every tick and ends at exactly
/// `1.0`. Agent, model and tool labels from the stage's
/// [`AgentProfile`](crate::AgentProfile) are narrated into the audit log.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    tick: Duration,
}

impl SimulatedExecutor {
    /// Creates a simulated executor ticking every 100ms.
    pub fn new() -> Self {
        Self {
            tick: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Sets the progress tick interval. A zero interval is raised to 1ms.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// The progress tick interval.
    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        stage: &Stage,
        _prior: &StageResults,
        ctx: &mut ExecutionContext,
    ) -> Result<StagePayload> {
        let duration = stage.profile.duration();

        let Some(agent) = stage.agent() else {
            ctx.log(AuditLevel::Info, "System trigger activated");
            tokio::time::sleep(duration).await;
            ctx.report_progress(1.0);
            return Ok(stage.profile.payload.clone());
        };

        ctx.log(
            AuditLevel::Agent,
            format!("{} ({}) starting execution...", agent.name, agent.framework),
        );
        ctx.log(AuditLevel::Info, format!("Loading {} model...", agent.model));
        for tool in &agent.tools {
            ctx.log(AuditLevel::Tool, format!("Calling tool {tool}"));
        }

        let increment = self.tick.as_secs_f64() / duration.as_secs_f64().max(f64::EPSILON);
        let mut elapsed = Duration::ZERO;
        let mut progress = 0.0_f64;
        while elapsed < duration {
            let step = self.tick.min(duration - elapsed);
            tokio::time::sleep(step).await;
            elapsed += step;
            progress = (progress + increment).min(1.0);
            if !ctx.report_progress(progress) {
                trace!(stage = %stage.id, "execution discarded, stopping ticks");
                return Ok(stage.profile.payload.clone());
            }
        }
        ctx.report_progress(1.0);

        ctx.log(AuditLevel::Success, format!("{} completed successfully", agent.name));
        Ok(stage.profile.payload.clone())
    }
}
