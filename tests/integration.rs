//! Integration tests for the loanflow orchestrator.
//!
//! These tests drive complete runs through the public API:
//! - Suspension at the checkpoint and approval to completion
//! - Rejection and termination
//! - Commands issued in the wrong state
//! - Reset while a stage is executing, including late reports
//! - Executor failures
//! - Audit log and event stream contents

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use loanflow::{
    AuditLevel, Decision, DecisionSummary, ExecutionContext, ExecutorProfile, LoanflowError,
    Orchestrator, OrchestratorConfig, Result, RunStatus, Stage, StageCatalog, StageExecutor,
    StageKind, StagePayload, StageResults, WorkflowEvent,
};

/// Executor whose behaviour per stage is scripted by the test.
#[derive(Debug, Default)]
struct ScriptedExecutor {
    fail_on: Option<String>,
    panic_on: Option<String>,
    gate_on: Option<String>,
    gate: Arc<Notify>,
    held: Arc<Mutex<Option<ExecutionContext>>>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedExecutor {
    fn failing_on(stage: &str) -> Self {
        Self {
            fail_on: Some(stage.to_string()),
            ..Self::default()
        }
    }

    fn panicking_on(stage: &str) -> Self {
        Self {
            panic_on: Some(stage.to_string()),
            ..Self::default()
        }
    }

    fn gated_on(stage: &str) -> Self {
        Self {
            gate_on: Some(stage.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        stage: &Stage,
        _prior: &StageResults,
        ctx: &mut ExecutionContext,
    ) -> Result<StagePayload> {
        self.executed.lock().push(stage.id.clone());

        if self.fail_on.as_deref() == Some(stage.id.as_str()) {
            return Err(LoanflowError::stage_execution(
                &stage.id,
                "credit bureau unavailable",
            ));
        }

        if self.panic_on.as_deref() == Some(stage.id.as_str()) {
            panic!("scoring model crashed");
        }

        if self.gate_on.as_deref() == Some(stage.id.as_str()) {
            ctx.report_progress(0.3);
            *self.held.lock() = Some(ctx.clone());
            self.gate.notified().await;
        }

        ctx.report_progress(1.0);
        Ok(stage.profile.payload.clone())
    }
}

fn stage(id: &str, kind: StageKind) -> Stage {
    Stage::new(
        id,
        kind,
        ExecutorProfile::new(Duration::from_millis(10), json!({ "stage": id })),
    )
}

/// intake -> scoring -> review (checkpoint) -> payout
fn small_catalog() -> StageCatalog {
    StageCatalog::builder()
        .stage(stage("intake", StageKind::Trigger))
        .stage(stage("scoring", StageKind::Automated))
        .stage(stage("review", StageKind::Checkpoint))
        .stage(stage("payout", StageKind::Automated))
        .build()
        .unwrap()
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        inter_stage_delay: Duration::ZERO,
        ..OrchestratorConfig::default()
    }
}

fn scripted(executor: ScriptedExecutor) -> (Orchestrator, Arc<ScriptedExecutor>) {
    let executor = Arc::new(executor);
    let orchestrator = Orchestrator::with_config(small_catalog(), executor.clone(), fast_config());
    (orchestrator, executor)
}

fn assert_invariants(orchestrator: &Orchestrator) {
    if let Err(violation) = orchestrator.snapshot().check_invariants() {
        panic!("invariant violated: {violation}");
    }
}

async fn wait_for_progress(events: &mut broadcast::Receiver<WorkflowEvent>, stage_id: &str) {
    loop {
        match events.recv().await {
            Ok(WorkflowEvent::StageProgress { stage, .. }) if stage == stage_id => return,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
        }
    }
}

// =============================================================================
// Loan origination catalog, simulated executor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_suspends_at_checkpoint_in_catalog_order() {
    let orchestrator = Orchestrator::simulated(StageCatalog::loan_origination());
    assert_invariants(&orchestrator);

    orchestrator.start().unwrap();
    assert_eq!(orchestrator.status(), RunStatus::Running);
    assert_invariants(&orchestrator);

    let status = orchestrator.wait_until_settled().await;
    assert_eq!(status, RunStatus::SuspendedForDecision);
    assert_invariants(&orchestrator);

    assert_eq!(
        orchestrator.completed_stage_ids(),
        vec!["trigger", "onboarding", "verification", "assessment"]
    );
    assert_eq!(
        orchestrator.pending_checkpoint_id().as_deref(),
        Some("humanReview")
    );
    assert!(orchestrator.current_stage_id().is_none());
    assert!(orchestrator.result("humanReview").is_none());
    assert_eq!(orchestrator.progress("assessment"), Some(1.0));

    // High confidence only produces a log line; the run still waits.
    let info = orchestrator
        .audit_log()
        .into_iter()
        .filter(|e| e.level == AuditLevel::Info)
        .map(|e| e.message)
        .collect::<Vec<_>>();
    assert!(info.contains(&"High confidence score - but flagging for manual review".to_string()));

    let summary = orchestrator.decision_summary().unwrap();
    assert_eq!(summary.applicant_name, "Sarah Johnson");
    assert_eq!(summary.credit_score, 742);
    assert_eq!(summary.recommendation, "APPROVE");
}

#[tokio::test(start_paused = true)]
async fn test_approval_runs_to_completion() {
    let orchestrator = Orchestrator::simulated(StageCatalog::loan_origination());
    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;

    orchestrator.resolve_decision(Decision::Approved).unwrap();
    assert_eq!(orchestrator.status(), RunStatus::Running);
    assert!(orchestrator.decision_summary().is_none());
    assert_invariants(&orchestrator);

    let status = orchestrator.wait_until_settled().await;
    assert_eq!(status, RunStatus::Completed);
    assert_invariants(&orchestrator);

    let all: Vec<String> = orchestrator
        .catalog()
        .stage_ids()
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(orchestrator.completed_stage_ids(), all);

    let review = orchestrator.result("humanReview").unwrap();
    assert_eq!(review["decision"], "approved");
    assert_eq!(review["reviewer"], "Loan Officer");
    assert_eq!(orchestrator.result("processing").unwrap()["status"], "completed");

    let messages: Vec<String> = orchestrator.audit_log().into_iter().map(|e| e.message).collect();
    assert_eq!(messages[0], "Initializing agentic workflow execution...");
    assert!(messages.contains(&"Human review approved: humanReview".to_string()));
    assert!(messages.contains(&"Loan approved - proceeding to processing".to_string()));
    assert!(messages.contains(&"Resuming workflow: processing".to_string()));
    assert_eq!(
        messages.last().map(String::as_str),
        Some("Agentic workflow completed successfully!")
    );
}

#[tokio::test(start_paused = true)]
async fn test_simulated_agents_narrate_into_audit_log() {
    let orchestrator = Orchestrator::simulated(StageCatalog::loan_origination());
    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;

    let log = orchestrator.audit_log();
    assert!(log
        .iter()
        .any(|e| e.level == AuditLevel::Info && e.message == "System trigger activated"));
    assert!(log.iter().any(|e| e.level == AuditLevel::Agent));
    assert!(log.iter().any(|e| e.level == AuditLevel::Tool));
    assert!(log
        .iter()
        .any(|e| e.level == AuditLevel::Warning
            && e.message == "Workflow paused - Human review required"));
    assert!(log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

// =============================================================================
// Rejection
// =============================================================================

#[tokio::test]
async fn test_rejection_terminates_run() {
    let (orchestrator, executor) = scripted(ScriptedExecutor::default());
    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;

    orchestrator.resolve_decision(Decision::Rejected).unwrap();
    assert_eq!(orchestrator.status(), RunStatus::Terminated);
    assert_invariants(&orchestrator);

    // Give any stray task a chance to run.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(orchestrator.status(), RunStatus::Terminated);
    assert_eq!(
        orchestrator.completed_stage_ids(),
        vec!["intake", "scoring", "review"]
    );
    assert!(orchestrator.result("payout").is_none());
    assert_eq!(*executor.executed.lock(), vec!["intake", "scoring"]);
    assert_eq!(
        orchestrator.snapshot().decision().map(|d| d.decision),
        Some(Decision::Rejected)
    );
    assert!(orchestrator
        .audit_log()
        .iter()
        .any(|e| e.level == AuditLevel::Error && e.message == "Loan rejected - workflow terminated"));
}

// =============================================================================
// Commands in the wrong state
// =============================================================================

#[tokio::test]
async fn test_resolve_while_running_leaves_state_unchanged() {
    let (orchestrator, executor) = scripted(ScriptedExecutor::gated_on("scoring"));
    let mut events = orchestrator.subscribe();
    orchestrator.start().unwrap();
    wait_for_progress(&mut events, "scoring").await;

    let before = orchestrator.snapshot();
    let log_len = orchestrator.audit_log().len();

    let err = orchestrator.resolve_decision(Decision::Approved).unwrap_err();
    assert!(matches!(
        err,
        LoanflowError::NoPendingDecision {
            status: RunStatus::Running
        }
    ));
    assert_eq!(orchestrator.snapshot(), before);
    assert_eq!(orchestrator.audit_log().len(), log_len);
    assert_invariants(&orchestrator);

    executor.gate.notify_one();
    assert_eq!(
        orchestrator.wait_until_settled().await,
        RunStatus::SuspendedForDecision
    );
}

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let (orchestrator, executor) = scripted(ScriptedExecutor::gated_on("scoring"));
    let mut events = orchestrator.subscribe();
    orchestrator.start().unwrap();
    wait_for_progress(&mut events, "scoring").await;

    let err = orchestrator.start().unwrap_err();
    assert!(matches!(
        err,
        LoanflowError::AlreadyRunning {
            status: RunStatus::Running
        }
    ));
    assert_eq!(orchestrator.generation(), 1);

    executor.gate.notify_one();
    orchestrator.wait_until_settled().await;
    let err = orchestrator.start().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Workflow already running (status: suspended_for_decision)"
    );
}

#[tokio::test]
async fn test_resolve_after_decision_is_rejected() {
    let (orchestrator, _) = scripted(ScriptedExecutor::default());
    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;
    orchestrator.resolve_decision(Decision::Rejected).unwrap();

    let err = orchestrator.resolve_decision(Decision::Approved).unwrap_err();
    assert!(matches!(
        err,
        LoanflowError::NoPendingDecision {
            status: RunStatus::Terminated
        }
    ));
}

// =============================================================================
// Reset and stale reports
// =============================================================================

#[tokio::test]
async fn test_reset_mid_execution_discards_run() {
    let (orchestrator, executor) = scripted(ScriptedExecutor::gated_on("scoring"));
    let mut events = orchestrator.subscribe();
    orchestrator.start().unwrap();
    wait_for_progress(&mut events, "scoring").await;

    assert_eq!(orchestrator.current_stage_id().as_deref(), Some("scoring"));
    assert_eq!(orchestrator.progress("scoring"), Some(0.3));

    orchestrator.reset();
    assert_eq!(orchestrator.status(), RunStatus::Idle);
    assert_invariants(&orchestrator);
    assert!(orchestrator.current_stage_id().is_none());
    assert!(orchestrator.completed_stage_ids().is_empty());
    assert!(orchestrator.results().is_empty());
    assert!(orchestrator.progress("intake").is_none());
    assert!(orchestrator.progress("scoring").is_none());
    assert!(orchestrator.audit_log().is_empty());

    // A late tick from the discarded execution is a no-op.
    let mut stale = executor.held.lock().take().unwrap();
    assert!(!stale.is_live());
    assert!(!stale.report_progress(0.9));
    assert!(!stale.log(AuditLevel::Info, "late"));
    assert!(orchestrator.progress("scoring").is_none());
    assert!(orchestrator.audit_log().is_empty());

    executor.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(orchestrator.status(), RunStatus::Idle);
    assert!(orchestrator.results().is_empty());
}

#[tokio::test]
async fn test_stale_context_ignored_after_restart() {
    let (orchestrator, executor) = scripted(ScriptedExecutor::gated_on("scoring"));
    let mut events = orchestrator.subscribe();
    orchestrator.start().unwrap();
    wait_for_progress(&mut events, "scoring").await;
    let mut stale = executor.held.lock().take().unwrap();

    orchestrator.reset();
    orchestrator.start().unwrap();
    assert_eq!(orchestrator.generation(), 3);
    wait_for_progress(&mut events, "scoring").await;

    // Same stage is active again, but under a new generation.
    assert_eq!(orchestrator.current_stage_id().as_deref(), Some("scoring"));
    assert!(!stale.report_progress(0.95));
    assert_eq!(orchestrator.progress("scoring"), Some(0.3));

    executor.gate.notify_one();
    assert_eq!(
        orchestrator.wait_until_settled().await,
        RunStatus::SuspendedForDecision
    );
    assert_invariants(&orchestrator);
}

#[tokio::test]
async fn test_reset_from_terminal_states() {
    let (orchestrator, _) = scripted(ScriptedExecutor::default());
    orchestrator.reset();
    assert_eq!(orchestrator.status(), RunStatus::Idle);

    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;
    orchestrator.resolve_decision(Decision::Approved).unwrap();
    assert_eq!(orchestrator.wait_until_settled().await, RunStatus::Completed);

    orchestrator.reset();
    assert_eq!(orchestrator.status(), RunStatus::Idle);
    assert!(orchestrator.snapshot().decision().is_none());
    assert_invariants(&orchestrator);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_executor_failure_fails_run() {
    let (orchestrator, executor) = scripted(ScriptedExecutor::failing_on("scoring"));
    orchestrator.start().unwrap();

    assert_eq!(orchestrator.wait_until_settled().await, RunStatus::Failed);
    assert_invariants(&orchestrator);

    let run = orchestrator.snapshot();
    let failure = run.failure().unwrap();
    assert_eq!(failure.stage_id, "scoring");
    assert_eq!(failure.reason, "credit bureau unavailable");
    assert_eq!(orchestrator.completed_stage_ids(), vec!["intake"]);
    assert!(orchestrator.progress("scoring").is_none());
    assert!(orchestrator.pending_checkpoint_id().is_none());
    assert_eq!(*executor.executed.lock(), vec!["intake", "scoring"]);

    let errors: Vec<String> = orchestrator
        .audit_log()
        .into_iter()
        .filter(|e| e.level == AuditLevel::Error)
        .map(|e| e.message)
        .collect();
    assert_eq!(errors, vec!["Workflow failed: credit bureau unavailable"]);

    let report = orchestrator.pipeline_status();
    assert_eq!(report.failed_stages(), vec!["scoring"]);

    // Failed is terminal until a new start.
    orchestrator.start().unwrap();
    assert_eq!(orchestrator.wait_until_settled().await, RunStatus::Failed);
}

#[tokio::test]
async fn test_executor_panic_fails_run() {
    let (orchestrator, _) = scripted(ScriptedExecutor::panicking_on("scoring"));
    orchestrator.start().unwrap();

    let settled = tokio::time::timeout(Duration::from_secs(2), orchestrator.wait_until_settled())
        .await
        .expect("run should settle after a panic");
    assert_eq!(settled, RunStatus::Failed);
    assert_invariants(&orchestrator);
    assert!(orchestrator.current_stage_id().is_none());

    let run = orchestrator.snapshot();
    let failure = run.failure().unwrap();
    assert_eq!(failure.stage_id, "scoring");
    assert_eq!(failure.reason, "executor panicked: scoring model crashed");

    let errors = orchestrator
        .audit_log()
        .into_iter()
        .filter(|e| e.level == AuditLevel::Error)
        .map(|e| e.message)
        .collect::<Vec<_>>();
    assert_eq!(
        errors,
        vec!["Workflow failed: executor panicked: scoring model crashed"]
    );

    // The run is terminal, not stuck: a new start is accepted.
    orchestrator.start().unwrap();
    assert_eq!(orchestrator.wait_until_settled().await, RunStatus::Failed);
}

// =============================================================================
// Audit log
// =============================================================================

#[tokio::test]
async fn test_success_entry_per_completed_stage() {
    let (orchestrator, _) = scripted(ScriptedExecutor::default());
    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;

    let successes = |o: &Orchestrator| {
        o.audit_log()
            .into_iter()
            .filter(|e| e.level == AuditLevel::Success)
            .map(|e| e.message)
            .collect::<Vec<_>>()
    };
    assert_eq!(
        successes(&orchestrator),
        vec!["Completed step: intake", "Completed step: scoring"]
    );

    orchestrator.resolve_decision(Decision::Approved).unwrap();
    orchestrator.wait_until_settled().await;
    assert_eq!(
        successes(&orchestrator),
        vec![
            "Completed step: intake",
            "Completed step: scoring",
            "Loan approved - proceeding to payout",
            "Completed step: payout",
            "Agentic workflow completed successfully!",
        ]
    );
}

#[tokio::test]
async fn test_resumed_stage_is_announced_once() {
    let (orchestrator, _) = scripted(ScriptedExecutor::default());
    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;
    orchestrator.resolve_decision(Decision::Approved).unwrap();
    orchestrator.wait_until_settled().await;

    let messages: Vec<String> = orchestrator.audit_log().into_iter().map(|e| e.message).collect();
    assert!(messages.contains(&"Starting step: intake".to_string()));
    assert!(messages.contains(&"Starting step: scoring".to_string()));
    assert!(messages.contains(&"Resuming workflow: payout".to_string()));
    assert!(!messages.contains(&"Starting step: payout".to_string()));

    assert_eq!(orchestrator.result("payout"), Some(json!({ "stage": "payout" })));
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn test_event_stream_for_approved_run() {
    let (orchestrator, _) = scripted(ScriptedExecutor::default());
    let mut events = orchestrator.subscribe();

    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;
    orchestrator.resolve_decision(Decision::Approved).unwrap();
    orchestrator.wait_until_settled().await;

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }

    assert!(received.iter().all(|e| e.generation() == 1));
    assert!(matches!(received.first(), Some(WorkflowEvent::RunStarted { .. })));
    assert!(matches!(received.last(), Some(WorkflowEvent::RunCompleted { .. })));

    let started: Vec<&str> = received
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::StageStarted { .. }))
        .filter_map(|e| e.stage())
        .collect();
    assert_eq!(started, vec!["intake", "scoring", "payout"]);

    let required = received
        .iter()
        .find(|e| matches!(e, WorkflowEvent::DecisionRequired { .. }))
        .unwrap();
    assert_eq!(required.stage(), Some("review"));
    assert_eq!(
        required.resulting_status(),
        Some(RunStatus::SuspendedForDecision)
    );
    assert!(received.iter().all(|e| !e.is_error()));
}

#[tokio::test]
async fn test_watch_status_follows_transitions() {
    let (orchestrator, _) = scripted(ScriptedExecutor::default());
    let status = orchestrator.watch_status();
    assert_eq!(*status.borrow(), RunStatus::Idle);

    orchestrator.start().unwrap();
    orchestrator.wait_until_settled().await;
    assert_eq!(*status.borrow(), RunStatus::SuspendedForDecision);

    orchestrator.reset();
    assert_eq!(*status.borrow(), RunStatus::Idle);
}

// =============================================================================
// Decision summary
// =============================================================================

#[test]
fn test_summary_defaults_for_empty_results() {
    let summary = DecisionSummary::project(&StageResults::new());
    assert_eq!(summary, DecisionSummary::default());
    assert_eq!(summary.requested_amount, 45_000.0);
    assert_eq!(summary.recommendation, "APPROVE");
    assert_eq!(summary.loan_term, "72 months");
    assert_eq!(summary.existing_loans, 1);
}

#[tokio::test]
async fn test_summary_reads_scripted_results() {
    let catalog = StageCatalog::builder()
        .stage(Stage::new(
            "onboarding",
            StageKind::Trigger,
            ExecutorProfile::new(
                Duration::ZERO,
                json!({ "applicant_data": { "name": "Ada Byron", "requested_amount": 12000 } }),
            ),
        ))
        .stage(Stage::new(
            "assessment",
            StageKind::Automated,
            ExecutorProfile::new(Duration::ZERO, json!({ "confidence": 0.99, "recommendation": "REVIEW" })),
        ))
        .stage(stage("review", StageKind::Checkpoint))
        .stage(stage("payout", StageKind::Automated))
        .build()
        .unwrap();
    let orchestrator =
        Orchestrator::with_config(catalog, Arc::new(ScriptedExecutor::default()), fast_config());

    orchestrator.start().unwrap();
    assert_eq!(
        orchestrator.wait_until_settled().await,
        RunStatus::SuspendedForDecision
    );

    let summary = orchestrator.decision_summary().unwrap();
    assert_eq!(summary.applicant_name, "Ada Byron");
    assert_eq!(summary.requested_amount, 12000.0);
    assert_eq!(summary.recommendation, "REVIEW");
    assert_eq!(summary.confidence, 0.99);
    assert_eq!(summary.credit_score, 742);
    assert_eq!(orchestrator.decision_summary(), Some(summary));
}
