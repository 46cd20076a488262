//! End-to-end workflow tests.
//!
//! These tests run requests through the orchestrator from decomposition to
//! the persisted, checkpointed report.

use std::sync::Arc;

use conductor::error::DecompositionError;
use conductor::exec::RunStatus;
use conductor::{
    Error, FailureReason, KeywordStrategy, Orchestrator, Request, RunOutcome, SyncExecutor,
    TaskDecomposer, TaskStatus,
};

use crate::fixtures::{default_agents, id, Script, ScriptedInvoker, TestStore};

fn orchestrator(invoker: &ScriptedInvoker, store: &TestStore) -> Orchestrator<SyncExecutor> {
    Orchestrator::new(
        TaskDecomposer::with_builtin().unwrap(),
        SyncExecutor::new(
            Arc::new(KeywordStrategy::with_defaults().unwrap()),
            Arc::new(invoker.clone()),
        ),
        default_agents(),
        store.store.clone(),
    )
}

/// Test: Feature request runs to completion
/// Given a feature request and invocations that all succeed
/// When the orchestrator runs it with the sequential executor
/// Then design, implement, test and document complete in that order
#[tokio::test]
async fn test_feature_request_fully_completes() {
    let invoker = ScriptedInvoker::instant();
    let store = TestStore::new();
    let orch = orchestrator(&invoker, &store);

    let report = orch
        .run(&Request::with_id("f1", Request::FEATURE, "user login"))
        .await
        .unwrap();

    assert!(report.all_completed());
    assert_eq!(report.status(), RunStatus::FullyCompleted);
    assert_eq!(
        invoker.called(),
        vec!["f1-design", "f1-implement", "f1-test", "f1-document"]
    );
    assert!(report.trace_respects_dependencies());

    let test = report.task(&id("f1-test")).unwrap();
    assert!(test.dependencies.contains(&id("f1-implement")));
    assert_eq!(test.description, "Test user login");
}

/// Test: Keyword selection routes each step to the right kind
#[tokio::test]
async fn test_steps_reach_matching_agents() {
    let invoker = ScriptedInvoker::instant();
    let store = TestStore::new();
    let orch = orchestrator(&invoker, &store);

    orch.run(&Request::with_id("b1", Request::BUGFIX, "crash on save"))
        .await
        .unwrap();

    let kinds: Vec<String> = invoker
        .calls()
        .iter()
        .map(|c| format!("{}:{}", c.task, c.agent.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            "b1-reproduce:qa",
            "b1-diagnose:architect",
            "b1-fix:backend",
            "b1-verify:qa"
        ]
    );
}

/// Test: A failed step blocks everything after it
/// Given a feature request whose implement step fails
/// When the orchestrator runs it
/// Then design is completed, implement failed, test and document blocked
#[tokio::test]
async fn test_failed_implement_blocks_rest() {
    let invoker = ScriptedInvoker::instant().script("-implement", Script::Fail("does not compile"));
    let store = TestStore::new();
    let orch = orchestrator(&invoker, &store);

    let outcome = orch
        .run_outcome(&Request::with_id("f1", Request::FEATURE, "user login"))
        .await;
    let report = match &outcome {
        RunOutcome::Partial(report) => report,
        other => panic!("expected partial outcome, got {}", other),
    };

    assert_eq!(report.completed_count(), 1);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.blocked_count(), 2);
    assert_eq!(report.task(&id("f1-design")).unwrap().status, TaskStatus::Completed);
    assert!(matches!(
        report.task(&id("f1-implement")).unwrap().failure,
        Some(FailureReason::Error { ref message }) if message.contains("does not compile")
    ));
    assert_eq!(
        report.task(&id("f1-document")).unwrap().failure,
        Some(FailureReason::Blocked {
            dependency: id("f1-test")
        })
    );
    assert_eq!(invoker.called(), vec!["f1-design", "f1-implement"]);
    assert_eq!(outcome.to_string(), "partially completed with 3 failed task(s)");
}

/// Test: A panicking agent is recorded as a task failure
#[tokio::test]
async fn test_agent_panic_is_task_failure() {
    let invoker = ScriptedInvoker::instant().script("-plan", Script::Panic);
    let store = TestStore::new();
    let orch = orchestrator(&invoker, &store);

    let report = orch
        .run(&Request::with_id("r1", Request::REFACTOR, "parser"))
        .await
        .unwrap();

    assert_eq!(report.completed_count(), 1);
    assert!(matches!(
        report.task(&id("r1-plan")).unwrap().failure,
        Some(FailureReason::Error { ref message }) if message.contains("panicked")
    ));
    assert_eq!(report.blocked_count(), 2);
}

/// Test: Messages record every dispatch and completion
#[tokio::test]
async fn test_messages_logged_per_dispatch_and_completion() {
    let invoker = ScriptedInvoker::instant().script("-test", Script::Fail("flaky"));
    let store = TestStore::new();
    let orch = orchestrator(&invoker, &store);

    let report = orch
        .run(&Request::with_id("f1", Request::FEATURE, "search"))
        .await
        .unwrap();

    // design, implement, test dispatched; document blocked.
    assert_eq!(report.messages.len(), 6);
    let coordinator = orch.registry().coordinator().clone();
    for pair in report.messages.chunks(2) {
        assert_eq!(pair[0].from_agent, coordinator);
        assert_eq!(pair[1].to_agent, coordinator);
        assert_eq!(pair[0].task_id, pair[1].task_id);
    }
    assert_eq!(report.messages[1].payload, "f1-design done by architect-1");
}

/// Test: Unknown request kind aborts without touching state
#[tokio::test]
async fn test_unknown_kind_is_aborted() {
    let invoker = ScriptedInvoker::instant();
    let store = TestStore::new();
    let orch = orchestrator(&invoker, &store);

    let outcome = orch.run_outcome(&Request::new("migration", "schema v2")).await;
    assert!(matches!(
        outcome,
        RunOutcome::Aborted(Error::Decomposition(DecompositionError::UnknownKind(ref kind))) if kind == "migration"
    ));
    assert!(outcome.report().is_none());
    assert!(invoker.calls().is_empty());
    assert!(!store.root().join("state.json").exists());
}

/// Test: Retrying just the failed subset
/// Given a partial run
/// When the failed tasks are retried and now succeed
/// Then only the retry copies run and the state holds both attempts
#[tokio::test]
async fn test_retry_runs_only_failed_subset() {
    let store = TestStore::new();
    let failing = ScriptedInvoker::instant().script("-implement", Script::Fail("boom"));
    let report = orchestrator(&failing, &store)
        .run(&Request::with_id("f1", Request::FEATURE, "export"))
        .await
        .unwrap();

    let healthy = ScriptedInvoker::instant();
    let retried = orchestrator(&healthy, &store).retry(&report).await.unwrap();

    assert!(retried.all_completed());
    assert_eq!(
        healthy.called(),
        vec!["f1-implement-retry1", "f1-test-retry1", "f1-document-retry1"]
    );
    let copy = retried.task(&id("f1-implement-retry1")).unwrap();
    assert_eq!(copy.parent_id, Some(id("f1-implement")));
    assert!(copy.dependencies.is_empty());

    let state = store.store.load().await.unwrap();
    assert_eq!(state.tasks.len(), 7);
    assert_eq!(state.last_checkpoint, retried.checkpoint);
    assert_ne!(report.checkpoint, retried.checkpoint);
}
