//! Persistence and recovery tests.
//!
//! These tests verify that state survives a restart, that checkpoints
//! restore exactly what they captured, and that a later process can pick
//! up failed work from disk.

use std::sync::Arc;

use conductor::error::CheckpointError;
use conductor::state::{GitRefRecorder, CHECKPOINT_REFS_PREFIX};
use conductor::{
    CheckpointId, KeywordStrategy, Orchestrator, Request, StateStore, SyncExecutor,
    TaskDecomposer, TaskStatus,
};

use crate::fixtures::{default_agents, git_repo, id, Script, ScriptedInvoker, TestStore};

fn orchestrator(invoker: &ScriptedInvoker, store: StateStore) -> Orchestrator<SyncExecutor> {
    Orchestrator::new(
        TaskDecomposer::with_builtin().unwrap(),
        SyncExecutor::new(
            Arc::new(KeywordStrategy::with_defaults().unwrap()),
            Arc::new(invoker.clone()),
        ),
        default_agents(),
        store,
    )
}

/// Test: State survives a new store instance
/// Given a completed run persisted by one store
/// When a second store opens the same directory
/// Then it loads the same agents, tasks and messages
#[tokio::test]
async fn test_state_survives_reopen() {
    let test = TestStore::new();
    let report = orchestrator(&ScriptedInvoker::instant(), test.store.clone())
        .run(&Request::with_id("f1", Request::FEATURE, "profile page"))
        .await
        .unwrap();

    let reopened = StateStore::new(test.root());
    let state = reopened.load().await.unwrap();

    assert_eq!(state.tasks, report.tasks);
    assert_eq!(state.messages, report.messages);
    assert_eq!(state.agents.len(), 5);
    assert!(state.agents.iter().all(|a| a.is_idle()));
    assert_eq!(state.last_checkpoint, report.checkpoint);
}

/// Test: Restoring a checkpoint brings back exactly what it captured
/// Given a checkpoint taken after one run
/// When another run changes the state and the checkpoint is restored
/// Then the current state equals the state at checkpoint time
#[tokio::test]
async fn test_restore_returns_captured_state() {
    let test = TestStore::new();
    let orch = orchestrator(&ScriptedInvoker::instant(), test.store.clone());
    orch.run(&Request::with_id("f1", Request::FEATURE, "search"))
        .await
        .unwrap();

    let captured = test.store.load().await.unwrap();
    let checkpoint = test.store.checkpoint("before bugfix").await.unwrap();

    orch.run(&Request::with_id("b1", Request::BUGFIX, "timeout"))
        .await
        .unwrap();
    assert_eq!(test.store.load().await.unwrap().tasks.len(), 8);

    let restored = test.store.restore(&checkpoint).await.unwrap();
    assert_eq!(restored, captured);
    assert_eq!(test.store.load().await.unwrap(), captured);
}

/// Test: Checkpoints with the same description get distinct ids
#[tokio::test]
async fn test_same_description_distinct_ids() {
    let test = TestStore::new();
    let first = test.store.checkpoint("nightly").await.unwrap();
    let second = test.store.checkpoint("nightly").await.unwrap();
    assert_ne!(first, second);

    let listed = test.store.list_checkpoints().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|c| c.description == "nightly"));
    assert!(listed[0].id < listed[1].id);
}

/// Test: Restoring an unknown checkpoint leaves state alone
#[tokio::test]
async fn test_restore_unknown_checkpoint() {
    let test = TestStore::new();
    orchestrator(&ScriptedInvoker::instant(), test.store.clone())
        .run(&Request::with_id("r1", Request::REFACTOR, "config loader"))
        .await
        .unwrap();
    let before = test.store.load().await.unwrap();

    let missing = CheckpointId::new("20200101T000000000000Z-000").unwrap();
    let result = test.store.restore(&missing).await;

    assert!(matches!(result, Err(CheckpointError::NotFound(_))));
    assert_eq!(test.store.load().await.unwrap(), before);
}

/// Test: Checkpoints in a git repository point at HEAD
/// Given a store recording refs in a repository with one commit
/// When a run finishes
/// Then its sidecar names a checkpoint ref that points at HEAD
#[tokio::test]
async fn test_git_backed_checkpoint() {
    let (repo_dir, head) = git_repo();
    let refs = GitRefRecorder::new(repo_dir.path()).unwrap();
    let test = TestStore::new();
    let store = test.store.clone().with_refs(Arc::new(refs.clone()));

    let report = orchestrator(&ScriptedInvoker::instant(), store.clone())
        .run(&Request::with_id("f1", Request::FEATURE, "audit log"))
        .await
        .unwrap();
    let checkpoint = report.checkpoint.unwrap();

    let info = store.checkpoint_info(&checkpoint).await.unwrap();
    assert_eq!(
        info.reference,
        format!("{}{}", CHECKPOINT_REFS_PREFIX, checkpoint)
    );
    assert_eq!(refs.resolve(&checkpoint).unwrap(), Some(head));
    assert_eq!(refs.list().unwrap(), vec![checkpoint.to_string()]);
}

/// Test: A later process retries failed work from disk
/// Given a persisted run whose test step failed
/// When a fresh orchestrator retries from the store
/// Then only test and document run again and nothing is left to retry
#[tokio::test]
async fn test_retry_persisted_after_restart() {
    let test = TestStore::new();
    let failing = ScriptedInvoker::instant().script("-test", Script::Fail("flaky"));
    orchestrator(&failing, test.store.clone())
        .run(&Request::with_id("f1", Request::FEATURE, "upload"))
        .await
        .unwrap();

    let state = test.store.load().await.unwrap();
    let retryable: Vec<String> = state
        .retryable_tasks()
        .iter()
        .map(|t| t.id.to_string())
        .collect();
    assert_eq!(retryable, vec!["f1-test", "f1-document"]);

    let healthy = ScriptedInvoker::instant();
    let report = orchestrator(&healthy, StateStore::new(test.root()))
        .retry_persisted()
        .await
        .unwrap();

    assert!(report.all_completed());
    assert_eq!(healthy.called(), vec!["f1-test-retry1", "f1-document-retry1"]);

    let state = test.store.load().await.unwrap();
    assert!(state.retryable_tasks().is_empty());
    assert_eq!(
        state.task(&id("f1-test")).unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(
        state.task(&id("f1-test-retry1")).unwrap().status,
        TaskStatus::Completed
    );
}
