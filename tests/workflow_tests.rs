mod common;

use std::sync::Arc;

use common::{
    BrokenSchema, RecordingExecutor, Reply, ScriptedCompletion, orchestrator, retail_guardrails,
    workflow_config
};
use nl2sql_guard::{
    config::WorkflowConfig,
    generator::SqlGenerator,
    guardrail::validate,
    workflow::{Orchestrator, TerminalOutcome, VerdictStatus}
};

#[tokio::test]
async fn test_safe_query_succeeds_first_try() {
    let completion = ScriptedCompletion::always("SELECT * FROM PRODUCTS");
    let executor = RecordingExecutor::succeeding();
    let state = orchestrator(completion.clone(), executor.clone(), 2)
        .run("list all products", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Succeeded);
    assert_eq!(completion.calls(), 1);
    assert_eq!(state.repair_count(), 0);
    assert_eq!(state.validation_verdict(), VerdictStatus::Safe);
    assert_eq!(state.candidate_sql(), Some("SELECT * FROM PRODUCTS"));
    assert_eq!(state.execution_result().map(|r| r.row_count()), Some(1));
    assert!(state.failure_reason().is_none());
    assert_eq!(executor.calls(), vec!["SELECT * FROM PRODUCTS"]);
}

#[tokio::test]
async fn test_unknown_table_exhausts_repairs() {
    let completion = ScriptedCompletion::always("SELECT * FROM EMPLOYEES");
    let executor = RecordingExecutor::succeeding();
    let state = orchestrator(completion.clone(), executor.clone(), 2)
        .run("who works here?", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Exhausted);
    assert_eq!(completion.calls(), 3);
    assert_eq!(state.generation_attempts(), 3);
    assert_eq!(state.repair_count(), 2);
    assert_eq!(state.validation_verdict(), VerdictStatus::Unsafe);
    assert!(state.failure_reason().unwrap().contains("EMPLOYEES"));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_rejected_candidate_is_repaired() {
    let completion = ScriptedCompletion::new([
        Reply::Text("DROP TABLE PRODUCTS"),
        Reply::Text("SELECT name FROM PRODUCTS")
    ]);
    let executor = RecordingExecutor::succeeding();
    let state = orchestrator(completion.clone(), executor.clone(), 2)
        .run("product names", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Succeeded);
    assert_eq!(completion.calls(), 2);
    assert_eq!(state.repair_count(), 1);

    let prompts = completion.prompts();
    let reason = validate("DROP TABLE PRODUCTS", &retail_guardrails())
        .reason()
        .unwrap()
        .to_string();
    assert!(!prompts[0].contains(&reason));
    assert!(prompts[1].contains(&reason));
    assert!(prompts[1].contains("DROP TABLE PRODUCTS"));
    assert_eq!(executor.calls(), vec!["SELECT name FROM PRODUCTS"]);

    let attempts = state.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].verdict, VerdictStatus::Unsafe);
    assert_eq!(attempts[1].verdict, VerdictStatus::Safe);
    assert_eq!(attempts[1].row_count, Some(1));
}

#[tokio::test]
async fn test_execution_failure_consumes_a_repair() {
    let completion = ScriptedCompletion::new([
        Reply::Text("SELECT nme FROM PRODUCTS"),
        Reply::Text("SELECT name FROM PRODUCTS")
    ]);
    let executor = RecordingExecutor::failing_first(["no such column: nme"]);
    let state = orchestrator(completion.clone(), executor.clone(), 2)
        .run("product names", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Succeeded);
    assert_eq!(state.repair_count(), 1);
    assert_eq!(executor.calls().len(), 2);
    let prompts = completion.prompts();
    assert!(prompts[1].contains("failed in the warehouse"));
    assert!(prompts[1].contains("SELECT nme FROM PRODUCTS"));
    assert!(state.execution_error().is_none());
    assert!(state.attempts()[0].execution_error.is_some());
    assert_eq!(state.attempts()[1].row_count, Some(1));
}

#[tokio::test]
async fn test_execution_failures_exhaust_budget() {
    let completion = ScriptedCompletion::always("SELECT price FROM PRODUCTS");
    let executor = RecordingExecutor::failing_first(["disk I/O error", "disk I/O error"]);
    let state = orchestrator(completion.clone(), executor.clone(), 1)
        .run("prices", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Exhausted);
    assert_eq!(completion.calls(), 2);
    assert_eq!(state.repair_count(), 1);
    assert!(state.failure_reason().is_some());
    assert_eq!(state.failure_reason(), state.execution_error());
    assert!(state.validation_reason().is_none());
    assert!(state.execution_result().is_none());
}

#[tokio::test]
async fn test_zero_repairs_means_single_attempt() {
    let completion = ScriptedCompletion::always("DELETE FROM ORDERS");
    let executor = RecordingExecutor::succeeding();
    let state = orchestrator(completion.clone(), executor.clone(), 0)
        .run("remove orders", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Exhausted);
    assert_eq!(completion.calls(), 1);
    assert_eq!(state.repair_count(), 0);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_rejected_without_retry() {
    let completion = ScriptedCompletion::new([Reply::Fail("rate limited")]);
    let executor = RecordingExecutor::succeeding();
    let state = orchestrator(completion.clone(), executor.clone(), 2)
        .run("anything", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Rejected);
    assert_eq!(completion.calls(), 1);
    assert_eq!(state.repair_count(), 0);
    assert!(state.candidate_sql().is_none());
    assert!(state.generation_error().is_some());
    assert_eq!(state.failure_reason(), state.generation_error());
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_reply_without_sql_is_rejected() {
    let completion = ScriptedCompletion::always("Sorry, I cannot help with that.");
    let executor = RecordingExecutor::succeeding();
    let state = orchestrator(completion, executor.clone(), 2)
        .run("anything", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Rejected);
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_repair_after_rejection_can_end_in_generation_failure() {
    let completion = ScriptedCompletion::new([
        Reply::Text("SELECT * FROM EMPLOYEES"),
        Reply::Fail("service unavailable")
    ]);
    let state = orchestrator(completion.clone(), RecordingExecutor::succeeding(), 2)
        .run("staff", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Rejected);
    assert_eq!(completion.calls(), 2);
    assert_eq!(state.repair_count(), 1);

    let attempts = state.attempts();
    assert_eq!(attempts.len() as u32, state.generation_attempts());
    assert_eq!(attempts[0].sql.as_deref(), Some("SELECT * FROM EMPLOYEES"));
    assert!(attempts[1].sql.is_none());
    assert_eq!(attempts[1].generation_error.as_deref(), state.generation_error());
}

#[tokio::test]
async fn test_schema_failure_is_fatal() {
    let completion = ScriptedCompletion::always("SELECT * FROM PRODUCTS");
    let orchestrator = Orchestrator::new(
        Arc::new(BrokenSchema),
        SqlGenerator::new(completion.clone()),
        RecordingExecutor::succeeding(),
        retail_guardrails(),
        workflow_config(2)
    );

    assert!(orchestrator.run("anything", None).await.is_err());
    assert_eq!(completion.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout_is_rejected() {
    let completion = ScriptedCompletion::new([Reply::Hang]);
    let config = WorkflowConfig {
        generation_timeout_ms: 50,
        ..workflow_config(2)
    };
    let orchestrator = Orchestrator::new(
        Arc::new(common::retail_schema()),
        SqlGenerator::new(completion),
        RecordingExecutor::succeeding(),
        retail_guardrails(),
        config
    );
    let state = orchestrator.run("anything", None).await.unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Rejected);
    assert_eq!(state.generation_attempts(), 1);
    assert!(state.generation_error().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_execution_timeout_is_repairable() {
    let completion = ScriptedCompletion::always("SELECT * FROM ORDERS");
    let executor = RecordingExecutor::hanging();
    let config = WorkflowConfig {
        execution_timeout_ms: 50,
        ..workflow_config(1)
    };
    let orchestrator = Orchestrator::new(
        Arc::new(common::retail_schema()),
        SqlGenerator::new(completion.clone()),
        executor.clone(),
        retail_guardrails(),
        config
    );
    let state = orchestrator.run("orders", None).await.unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Exhausted);
    assert_eq!(completion.calls(), 2);
    assert_eq!(executor.calls().len(), 2);
    assert!(state.execution_error().is_some());
}

#[tokio::test]
async fn test_executor_never_sees_unsafe_sql() {
    let completion = ScriptedCompletion::new([
        Reply::Text("UPDATE PRODUCTS SET price = 0"),
        Reply::Text("SELECT 1; DROP TABLE ORDERS"),
        Reply::Text("SELECT * FROM PRODUCTS WHERE name = 'x' -- ; DELETE")
    ]);
    let executor = RecordingExecutor::succeeding();
    let guardrails = retail_guardrails();
    let state = orchestrator(completion, executor.clone(), 5)
        .run("anything", None)
        .await
        .unwrap();

    assert_eq!(state.terminal_outcome(), TerminalOutcome::Succeeded);
    for sql in executor.calls() {
        assert!(validate(&sql, &guardrails).is_safe(), "executed unsafe SQL: {sql}");
    }
    assert_eq!(state.repair_count(), 2);
}

#[tokio::test]
async fn test_run_id_is_kept_or_generated() {
    let state = orchestrator(
        ScriptedCompletion::always("SELECT 1 FROM PRODUCTS"),
        RecordingExecutor::succeeding(),
        2
    )
    .run("q", Some("run-42".to_string()))
    .await
    .unwrap();
    assert_eq!(state.run_id(), "run-42");

    let state = orchestrator(
        ScriptedCompletion::always("SELECT 1 FROM PRODUCTS"),
        RecordingExecutor::succeeding(),
        2
    )
    .run("q", None)
    .await
    .unwrap();
    assert_eq!(state.run_id().len(), 36);
}

#[tokio::test]
async fn test_concurrent_runs_share_an_orchestrator() {
    let orchestrator = Arc::new(orchestrator(
        ScriptedCompletion::always("SELECT name FROM CUSTOMERS"),
        RecordingExecutor::succeeding(),
        2
    ));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.run(&format!("question {i}"), None).await })
        })
        .collect();

    for handle in handles {
        let state = handle.await.unwrap().unwrap();
        assert_eq!(state.terminal_outcome(), TerminalOutcome::Succeeded);
    }
}

#[tokio::test]
async fn test_state_serializes_for_callers() {
    let state = orchestrator(
        ScriptedCompletion::always("SELECT * FROM EMPLOYEES"),
        RecordingExecutor::succeeding(),
        1
    )
    .run("staff", Some("r1".into()))
    .await
    .unwrap();

    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["terminal_outcome"], "EXHAUSTED");
    assert_eq!(json["run_id"], "r1");
    assert_eq!(json["attempts"].as_array().unwrap().len(), 2);
    assert!(json.get("schema_snapshot").is_none());
}
