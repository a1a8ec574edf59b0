//! Stage definitions for the loanflow pipeline.
//!
//! A [`Stage`] is an immutable record created once when the
//! [`StageCatalog`](crate::StageCatalog) is built. Its [`StageKind`] decides
//! how the orchestrator treats it: trigger and automated stages run through
//! a [`StageExecutor`](crate::StageExecutor), the checkpoint suspends the
//! run until a human decision arrives.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Opaque result payload produced by a stage.
pub type StagePayload = serde_json::Value;

/// Accumulated stage results, keyed by stage id.
pub type StageResults = HashMap<String, StagePayload>;

/// The kind of a stage, dispatched on by the drive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Entry point of the pipeline.
    Trigger,

    /// Automated work performed by a stage executor.
    Automated,

    /// Human adjudication point. The run suspends here.
    Checkpoint,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Trigger => "trigger",
            Self::Automated => "automated",
            Self::Checkpoint => "checkpoint",
        };
        f.write_str(label)
    }
}

/// Descriptive labels for the agent backing a stage.
///
/// These are inert: nothing is invoked through them. Executors may use
/// them to describe their activity in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Display name, e.g. "Verification Agent".
    pub name: String,

    /// Agent framework label.
    pub framework: String,

    /// Model label.
    pub model: String,

    /// Tool names the agent calls.
    #[serde(default)]
    pub tools: Vec<String>,

    /// MCP server names the agent talks to.
    #[serde(default)]
    pub mcp_servers: Vec<String>,
}

impl AgentProfile {
    /// Creates an agent profile with no tools or servers.
    pub fn new(
        name: impl Into<String>,
        framework: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            framework: framework.into(),
            model: model.into(),
            tools: Vec::new(),
            mcp_servers: Vec::new(),
        }
    }

    /// Adds tool names.
    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Adds MCP server names.
    pub fn with_mcp_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mcp_servers.extend(servers.into_iter().map(Into::into));
        self
    }
}

/// Configuration handed to the stage executor.
///
/// The orchestrator never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorProfile {
    /// Simulated execution time in milliseconds.
    pub duration_ms: u64,

    /// Canned result payload.
    #[serde(default)]
    pub payload: StagePayload,

    /// Optional agent labels.
    #[serde(default)]
    pub agent: Option<AgentProfile>,
}

impl ExecutorProfile {
    /// Creates a profile with the given duration and payload.
    pub fn new(duration: Duration, payload: StagePayload) -> Self {
        Self {
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            payload,
            agent: None,
        }
    }

    /// Attaches an agent profile.
    pub fn with_agent(mut self, agent: AgentProfile) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Returns the simulated duration.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

impl Default for ExecutorProfile {
    fn default() -> Self {
        Self {
            duration_ms: 0,
            payload: StagePayload::Null,
            agent: None,
        }
    }
}

/// An immutable pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique identifier within the catalog.
    pub id: String,

    /// How the orchestrator treats this stage.
    pub kind: StageKind,

    /// Zero-based position in the catalog sequence.
    pub ordinal: usize,

    /// Configuration for the stage executor.
    pub profile: ExecutorProfile,
}

impl Stage {
    /// Creates a stage. The ordinal is assigned by the catalog builder.
    pub fn new(id: impl Into<String>, kind: StageKind, profile: ExecutorProfile) -> Self {
        Self {
            id: id.into(),
            kind,
            ordinal: 0,
            profile,
        }
    }

    /// Returns true if this stage suspends the run for a decision.
    pub fn is_checkpoint(&self) -> bool {
        matches!(self.kind, StageKind::Checkpoint)
    }

    /// Returns the agent profile, if the stage has one.
    pub fn agent(&self) -> Option<&AgentProfile> {
        self.profile.agent.as_ref()
    }
}
