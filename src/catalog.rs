//! The ordered stage catalog.
//!
//! This module provides [`StageCatalog`] and [`CatalogBuilder`]. The catalog
//! is a linear chain of stages held in a petgraph graph, with exactly one
//! checkpoint stage somewhere strictly inside the chain.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::{AgentProfile, ExecutorProfile, LoanflowError, Result, Stage, StageKind};

/// An immutable, ordered sequence of stages.
///
/// # Construction
///
/// ```
/// use loanflow::{ExecutorProfile, Stage, StageCatalog, StageKind};
///
/// let catalog = StageCatalog::builder()
///     .stage(Stage::new("intake", StageKind::Trigger, ExecutorProfile::default()))
///     .stage(Stage::new("review", StageKind::Checkpoint, ExecutorProfile::default()))
///     .stage(Stage::new("payout", StageKind::Automated, ExecutorProfile::default()))
///     .build()?;
///
/// assert_eq!(catalog.next("intake"), Some("review"));
/// assert_eq!(catalog.next("payout"), None);
/// # Ok::<(), loanflow::LoanflowError>(())
/// ```
pub struct StageCatalog {
    /// Stages linked by `stage -> successor` edges.
    graph: DiGraph<Stage, ()>,
    /// Mapping from stage id to node index.
    id_to_index: HashMap<String, NodeIndex>,
    /// Node indices in catalog order.
    order: Vec<NodeIndex>,
    /// The single checkpoint stage.
    checkpoint: NodeIndex,
}

impl StageCatalog {
    /// Creates a new catalog builder.
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Builds a catalog from its serde description.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::InvalidCatalog`] if the stages violate a
    /// catalog rule.
    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        config
            .stages
            .into_iter()
            .fold(Self::builder(), |builder, stage| {
                builder.stage(Stage::new(stage.id, stage.kind, stage.profile))
            })
            .build()
    }

    /// Parses and builds a catalog from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::Serialization`] for malformed JSON and
    /// [`LoanflowError::InvalidCatalog`] for a structurally invalid catalog.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CatalogConfig = serde_json::from_str(json)?;
        Self::from_config(config)
    }

    /// Reads and builds a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::Io`] if the file cannot be read, plus the
    /// errors of [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Returns the stages in catalog order.
    pub fn stages(&self) -> impl Iterator<Item = &Stage> + '_ {
        self.order.iter().map(|idx| &self.graph[*idx])
    }

    /// Returns the stage ids in catalog order.
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages().map(|s| s.id.as_str()).collect()
    }

    /// Returns the number of stages.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the catalog has no stages. A built catalog never is.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns true if a stage with the given id exists.
    pub fn contains(&self, id: &str) -> bool {
        self.id_to_index.contains_key(id)
    }

    /// Returns the stage with the given id.
    pub fn get(&self, id: &str) -> Option<&Stage> {
        self.id_to_index.get(id).map(|idx| &self.graph[*idx])
    }

    /// Returns the stage with the given id, or an error.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::StageNotFound`] if the stage doesn't exist.
    pub fn require(&self, id: &str) -> Result<&Stage> {
        self.get(id)
            .ok_or_else(|| LoanflowError::StageNotFound(id.to_string()))
    }

    /// Returns the first stage of the pipeline.
    pub fn first(&self) -> &Stage {
        &self.graph[self.order[0]]
    }

    /// Returns the checkpoint stage.
    pub fn checkpoint(&self) -> &Stage {
        &self.graph[self.checkpoint]
    }

    /// Returns the id of the stage following `id`, or `None` at the end of
    /// the pipeline or for an unknown id.
    pub fn next(&self, id: &str) -> Option<&str> {
        let idx = self.id_to_index.get(id)?;
        self.graph
            .neighbors_directed(*idx, Direction::Outgoing)
            .next()
            .map(|next| self.graph[next].id.as_str())
    }

    /// Returns the id of the stage preceding `id`.
    pub fn previous(&self, id: &str) -> Option<&str> {
        let idx = self.id_to_index.get(id)?;
        self.graph
            .neighbors_directed(*idx, Direction::Incoming)
            .next()
            .map(|prev| self.graph[prev].id.as_str())
    }

    /// Builds the six-stage loan origination catalog.
    ///
    /// `trigger → onboarding → verification → assessment → humanReview →
    /// processing`, each automated stage carrying the canned result of its
    /// simulated agent.
    pub fn loan_origination() -> Self {
        let stages = vec![
            Stage::new(
                "trigger",
                StageKind::Trigger,
                ExecutorProfile::new(
                    Duration::from_millis(1000),
                    json!({ "status": "completed", "trigger": "application_started" }),
                ),
            ),
            Stage::new(
                "onboarding",
                StageKind::Automated,
                ExecutorProfile::new(
                    Duration::from_millis(8000),
                    json!({
                        "status": "completed",
                        "applicant_data": {
                            "name": "Sarah Johnson",
                            "type": "self-employed",
                            "income": 85000,
                            "employment": "Freelance Marketing Consultant",
                            "requested_amount": 45000,
                            "loan_purpose": "Business Equipment Purchase"
                        },
                        "documents_collected": ["tax_returns", "bank_statements", "business_license"],
                        "confidence": 0.95
                    }),
                )
                .with_agent(
                    AgentProfile::new("Interview Agent", "LangGraph", "GPT-4")
                        .with_tools(["conversation_tool", "form_builder", "document_uploader"])
                        .with_mcp_servers(["ui_server", "validation_server"]),
                ),
            ),
            Stage::new(
                "verification",
                StageKind::Automated,
                ExecutorProfile::new(
                    Duration::from_millis(12000),
                    json!({
                        "status": "completed",
                        "credit_score": 742,
                        "identity_verified": true,
                        "income_verified": true,
                        "debt_to_income": 0.28,
                        "existing_loans": 1,
                        "risk_flags": [],
                        "account_history": "18 months verified"
                    }),
                )
                .with_agent(
                    AgentProfile::new("Verification Agent", "CrewAI", "Claude-3.5")
                        .with_tools(["credit_bureau_api", "plaid_connector", "id_verification", "ocr_tool"])
                        .with_mcp_servers(["banking_server", "credit_server", "identity_server"]),
                ),
            ),
            Stage::new(
                "assessment",
                StageKind::Automated,
                ExecutorProfile::new(
                    Duration::from_millis(10000),
                    json!({
                        "status": "completed",
                        "risk_score": 0.23,
                        "dti_ratio": 0.28,
                        "recommendation": "APPROVE",
                        "confidence": 0.87,
                        "monthly_payment": 678,
                        "loan_term": "72 months",
                        "interest_rate": 6.4,
                        "flags": ["Self-employed income", "First-time business borrower"]
                    }),
                )
                .with_agent(
                    AgentProfile::new("Risk Assessment Agent", "LlamaStack", "Llama-3.1-70B")
                        .with_tools(["risk_calculator", "financial_analyzer", "policy_engine"])
                        .with_mcp_servers(["risk_modeling_server", "compliance_server"]),
                ),
            ),
            Stage::new(
                "humanReview",
                StageKind::Checkpoint,
                ExecutorProfile::new(
                    Duration::from_millis(5000),
                    json!({
                        "status": "completed",
                        "case_created": true,
                        "assigned_officer": "jane_doe",
                        "priority": "medium"
                    }),
                )
                .with_agent(
                    AgentProfile::new("Review Coordinator", "Custom Agent", "GPT-4o")
                        .with_tools(["case_manager", "notification_tool", "priority_scorer"])
                        .with_mcp_servers(["workflow_server", "communication_server"]),
                ),
            ),
            Stage::new(
                "processing",
                StageKind::Automated,
                ExecutorProfile::new(
                    Duration::from_millis(7000),
                    json!({
                        "status": "completed",
                        "documents_generated": true,
                        "notifications_sent": true,
                        "core_system_updated": true
                    }),
                )
                .with_agent(
                    AgentProfile::new("Processing Agent", "LangGraph", "GPT-4")
                        .with_tools(["document_generator", "esignature_api", "core_banking_connector"])
                        .with_mcp_servers(["document_server", "banking_core_server"]),
                ),
            ),
        ];

        let builder = stages
            .into_iter()
            .fold(Self::builder(), CatalogBuilder::stage);
        match builder.build() {
            Ok(catalog) => catalog,
            Err(e) => unreachable!("built-in catalog is valid: {e}"),
        }
    }
}

impl std::fmt::Debug for StageCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageCatalog")
            .field("stages", &self.stage_ids())
            .field("checkpoint", &self.checkpoint().id)
            .finish()
    }
}

/// Serde description of a catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Stages in pipeline order.
    pub stages: Vec<StageConfig>,
}

/// Serde description of a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage id.
    pub id: String,

    /// Stage kind.
    pub kind: StageKind,

    /// Executor configuration, flattened into the stage object.
    #[serde(flatten)]
    pub profile: ExecutorProfile,
}

/// Builder for constructing [`StageCatalog`] instances.
///
/// Stages are chained in the order they are added.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    stages: Vec<Stage>,
}

impl CatalogBuilder {
    /// Creates a new, empty catalog builder.
    fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage to the end of the pipeline.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Builds the catalog, validating its structure.
    ///
    /// # Errors
    ///
    /// Returns [`LoanflowError::InvalidCatalog`] when:
    /// - the catalog is empty
    /// - two stages share an id
    /// - there is not exactly one checkpoint stage
    /// - the checkpoint is the first or last stage
    pub fn build(self) -> Result<StageCatalog> {
        if self.stages.is_empty() {
            return Err(LoanflowError::InvalidCatalog(
                "catalog has no stages".to_string(),
            ));
        }

        let checkpoints: Vec<usize> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_checkpoint())
            .map(|(pos, _)| pos)
            .collect();
        let checkpoint_pos = match checkpoints.as_slice() {
            [pos] => *pos,
            [] => {
                return Err(LoanflowError::InvalidCatalog(
                    "catalog has no checkpoint stage".to_string(),
                ))
            }
            _ => {
                return Err(LoanflowError::InvalidCatalog(format!(
                    "catalog has {} checkpoint stages, expected exactly one",
                    checkpoints.len()
                )))
            }
        };
        if checkpoint_pos == 0 || checkpoint_pos == self.stages.len() - 1 {
            return Err(LoanflowError::InvalidCatalog(format!(
                "checkpoint stage '{}' must have stages before and after it",
                self.stages[checkpoint_pos].id
            )));
        }

        let mut graph = DiGraph::new();
        let mut id_to_index = HashMap::new();
        let mut order = Vec::with_capacity(self.stages.len());

        for (ordinal, mut stage) in self.stages.into_iter().enumerate() {
            if id_to_index.contains_key(&stage.id) {
                return Err(LoanflowError::InvalidCatalog(format!(
                    "duplicate stage id: {}",
                    stage.id
                )));
            }
            stage.ordinal = ordinal;
            let id = stage.id.clone();
            let index = graph.add_node(stage);
            if let Some(prev) = order.last() {
                graph.add_edge(*prev, index, ());
            }
            id_to_index.insert(id, index);
            order.push(index);
        }

        Ok(StageCatalog {
            graph,
            id_to_index,
            checkpoint: order[checkpoint_pos],
            order,
        })
    }
}
