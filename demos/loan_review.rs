//! Loan review walkthrough.
//!
//! This example demonstrates:
//! - Running the built-in loan origination catalog with simulated agents
//! - Observing workflow events while stages execute
//! - Reading the decision summary at the checkpoint
//! - Approving or rejecting the application
//! - Printing the pipeline status and the audit log
//!
//! Run with: `cargo run --example loan_review -- [approved|rejected]`
//!
//! Set `RUST_LOG=loanflow=debug` to see the orchestrator's tracing output.

use std::sync::Arc;

use loanflow::{
    Decision, Orchestrator, OrchestratorConfig, Result, RunStatus, SimulatedExecutor,
    StageCatalog, WorkflowEvent,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let decision: Decision = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("approved")
        .parse()?;

    println!("\n🏦 Loanflow - Loan Review Demo\n");

    let catalog = StageCatalog::loan_origination();
    println!("📋 Stages: {:?}\n", catalog.stage_ids());

    let orchestrator = Orchestrator::with_config(
        catalog,
        Arc::new(SimulatedExecutor::new()),
        OrchestratorConfig::default(),
    );

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkflowEvent::StageStarted { stage, .. } => {
                    println!("   [Event] Stage '{}' started", stage);
                }
                WorkflowEvent::StageCompleted { stage, .. } => {
                    println!("   [Event] Stage '{}' completed", stage);
                }
                WorkflowEvent::DecisionRequired { stage, .. } => {
                    println!("   [Event] Decision required at '{}'", stage);
                }
                WorkflowEvent::StageFailed { stage, error, .. } => {
                    println!("   [Event] Stage '{}' failed: {}", stage, error);
                }
                WorkflowEvent::RunCompleted { .. } => {
                    println!("   [Event] Run completed");
                }
                _ => {}
            }
        }
    });

    println!("▶️  Starting workflow");
    println!("─────────────────────────────────────────");
    orchestrator.start()?;

    if orchestrator.wait_until_settled().await == RunStatus::SuspendedForDecision {
        println!("\n📊 Status at checkpoint:");
        println!("─────────────────────────────────────────");
        println!("{}", orchestrator.pipeline_status());

        if let Some(summary) = orchestrator.decision_summary() {
            println!("👤 Application for review");
            println!("   Applicant:   {} ({})", summary.applicant_name, summary.employment);
            println!("   Amount:      ${:.0} for {}", summary.requested_amount, summary.loan_purpose);
            println!("   Credit:      {}  DTI: {:.0}%", summary.credit_score, summary.debt_to_income * 100.0);
            println!(
                "   Terms:       ${:.0}/month, {} at {}%",
                summary.monthly_payment, summary.loan_term, summary.interest_rate
            );
            println!(
                "   Assessment:  {} (risk {:.2}, confidence {:.0}%)",
                summary.recommendation,
                summary.risk_score,
                summary.confidence * 100.0
            );
            for flag in &summary.flagged_items {
                println!("   ⚠️  {}", flag);
            }
        }

        println!("\n✍️  Reviewer decision: {}", decision);
        println!("─────────────────────────────────────────");
        orchestrator.resolve_decision(decision)?;
    }

    let status = orchestrator.wait_until_settled().await;

    println!("\n📊 Final Status:");
    println!("─────────────────────────────────────────");
    println!("{}", orchestrator.pipeline_status());

    println!("📜 Audit log:");
    for entry in orchestrator.audit_log() {
        println!("   {}", entry);
    }

    match status {
        RunStatus::Completed => println!("\n🎉 Loan approved and processed!\n"),
        RunStatus::Terminated => println!("\n🛑 Loan rejected.\n"),
        other => println!("\nRun ended as {}\n", other),
    }

    Ok(())
}
