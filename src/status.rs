//! Pipeline status reporting and visualization.
//!
//! This module provides [`PipelineStatus`] for inspecting a run stage by
//! stage, as a reviewer dashboard would show it.

use std::fmt;

use crate::{RunStatus, StageCatalog, StageKind, WorkflowRun};

/// Display state of a single stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageState {
    /// Not reached yet.
    Pending,
    /// Executing, with progress in `[0, 1]`.
    Active(f64),
    /// The checkpoint, waiting for a reviewer.
    AwaitingDecision,
    /// Result stored.
    Complete,
    /// The executor failed here.
    Failed(String),
}

/// Status entry for a single stage within a pipeline.
#[derive(Debug, Clone)]
pub struct StageStatusEntry {
    /// The stage id.
    pub id: String,
    /// The stage kind.
    pub kind: StageKind,
    /// The display state.
    pub state: StageState,
    /// Agent backing the stage, if any.
    pub agent: Option<String>,
    /// Number of tools the agent calls.
    pub tool_count: usize,
    /// Number of MCP servers the agent uses.
    pub mcp_count: usize,
}

impl StageStatusEntry {
    /// Returns a status indicator character.
    pub fn status_char(&self) -> char {
        match self.state {
            StageState::Pending => '⏳',
            StageState::Active(_) => '🔄',
            StageState::AwaitingDecision => '👀',
            StageState::Complete => '✅',
            StageState::Failed(_) => '❌',
        }
    }

    fn state_label(&self) -> String {
        match &self.state {
            StageState::Pending => "pending".to_string(),
            StageState::Active(progress) => format!("active {:.0}%", progress * 100.0),
            StageState::AwaitingDecision => "awaiting decision".to_string(),
            StageState::Complete => "complete".to_string(),
            StageState::Failed(_) => "failed".to_string(),
        }
    }
}

/// A per-stage snapshot of a run.
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    /// Overall run status.
    pub run_status: RunStatus,
    /// Status of each stage in catalog order.
    pub stages: Vec<StageStatusEntry>,
}

impl PipelineStatus {
    /// Builds the status of `run` against `catalog`.
    pub fn from_run(catalog: &StageCatalog, run: &WorkflowRun) -> Self {
        let failure = run.failure();
        let stages = catalog
            .stages()
            .map(|stage| {
                let state = if run.is_completed(&stage.id) {
                    StageState::Complete
                } else if run.current_stage_id() == Some(stage.id.as_str()) {
                    StageState::Active(run.progress(&stage.id).unwrap_or(0.0))
                } else if run.pending_checkpoint_id() == Some(stage.id.as_str()) {
                    StageState::AwaitingDecision
                } else if let Some(f) = failure.filter(|f| f.stage_id == stage.id) {
                    StageState::Failed(f.reason.clone())
                } else {
                    StageState::Pending
                };
                let agent = stage.agent();
                StageStatusEntry {
                    id: stage.id.clone(),
                    kind: stage.kind,
                    state,
                    agent: agent.map(|a| a.name.clone()),
                    tool_count: agent.map_or(0, |a| a.tools.len()),
                    mcp_count: agent.map_or(0, |a| a.mcp_servers.len()),
                }
            })
            .collect();

        Self {
            run_status: run.status(),
            stages,
        }
    }

    /// Returns true if every stage is complete.
    pub fn is_complete(&self) -> bool {
        self.stages
            .iter()
            .all(|s| matches!(s.state, StageState::Complete))
    }

    /// Returns the ids of stages that have failed.
    pub fn failed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Failed(_)))
            .map(|s| s.id.as_str())
            .collect()
    }

    /// Returns the stage currently executing, if any.
    pub fn active_stage(&self) -> Option<&StageStatusEntry> {
        self.stages
            .iter()
            .find(|s| matches!(s.state, StageState::Active(_)))
    }

    /// Tools in use by the active stage's agent.
    pub fn active_tools(&self) -> usize {
        self.active_stage().map_or(0, |s| s.tool_count)
    }

    /// MCP servers in use by the active stage's agent.
    pub fn active_mcp_servers(&self) -> usize {
        self.active_stage().map_or(0, |s| s.mcp_count)
    }

    /// Returns the overall progress as a percentage of completed stages.
    pub fn progress_percent(&self) -> f32 {
        if self.stages.is_empty() {
            return 100.0;
        }

        let completed = self
            .stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Complete))
            .count();

        (completed as f32 / self.stages.len() as f32) * 100.0
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Loan workflow ({}):", self.run_status)?;
        writeln!(f)?;

        for stage in &self.stages {
            write!(
                f,
                "  {} {:<15} {:<18} {}",
                stage.status_char(),
                stage.id,
                stage.state_label(),
                stage.agent.as_deref().unwrap_or("-")
            )?;

            if let StageState::Failed(ref error) = stage.state {
                write!(f, "  Error: {}", error)?;
            }

            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Progress: {:.0}%", self.progress_percent())?;
        writeln!(
            f,
            "Active tools: {}  MCP servers: {}",
            self.active_tools(),
            self.active_mcp_servers()
        )?;

        Ok(())
    }
}
