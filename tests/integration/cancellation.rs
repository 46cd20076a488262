//! Cancellation and timeout tests.
//!
//! Cancelling is cooperative: pending tasks fail as cancelled right away
//! while in-flight tasks finish and have their outcome recorded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use conductor::exec::{ExecutionEvent, ExecutorConfig};
use conductor::{
    AsyncExecutor, Executor, FailureReason, KeywordStrategy, Orchestrator, Request, SyncExecutor,
    TaskDecomposer, TaskGraph, TaskStatus,
};

use crate::fixtures::{backends, chain, default_agents, id, task, ScriptedInvoker, TestStore};

fn keyword() -> Arc<KeywordStrategy> {
    Arc::new(KeywordStrategy::with_defaults().unwrap())
}

/// Test: Cancel with 3 Planned and 1 InProgress
/// Given a chain a -> b -> c -> d with a running
/// When the run is cancelled
/// Then b, c, d fail as cancelled before a finishes, and a's outcome is kept
#[tokio::test]
async fn test_cancel_marks_planned_and_keeps_in_flight() {
    let invoker = ScriptedInvoker::new(Duration::from_millis(200));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone())).with_events(tx);
    let token = exec.cancellation();

    let agents = backends(2);
    let run = exec.execute(chain(&["a", "b", "c", "d"]), &agents);
    let cancel = async {
        loop {
            match rx.recv().await {
                Some(ExecutionEvent::TaskStarted { task_id, .. }) if task_id == id("a") => break,
                Some(_) => continue,
                None => return,
            }
        }
        token.cancel();
    };
    let (report, ()) = tokio::join!(run, cancel);
    let report = report.unwrap();

    assert_eq!(report.task(&id("a")).unwrap().status, TaskStatus::Completed);
    for name in ["b", "c", "d"] {
        assert_eq!(
            report.task(&id(name)).unwrap().failure,
            Some(FailureReason::Cancelled),
            "{} should be cancelled",
            name
        );
    }
    assert_eq!(invoker.called(), vec!["a"]);

    // Cancellations were recorded before the in-flight task completed.
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let completed_at = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::TaskCompleted { task_id } if *task_id == id("a")))
        .unwrap();
    let cancelled: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, ExecutionEvent::TaskFailed { reason: FailureReason::Cancelled, .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(cancelled.len(), 3);
    assert!(cancelled.iter().all(|i| *i < completed_at));
    assert_eq!(
        events.last(),
        Some(&ExecutionEvent::RunFinished {
            completed: 1,
            failed: 3
        })
    );
}

/// Test: Sequential executor stops after the running task
#[tokio::test]
async fn test_sequential_cancel_mid_run() {
    let invoker = ScriptedInvoker::new(Duration::from_millis(100));
    let exec = SyncExecutor::new(keyword(), Arc::new(invoker.clone()));
    let token = exec.cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
    });

    let report = exec
        .execute(chain(&["a", "b", "c", "d"]), &backends(1))
        .await
        .unwrap();

    assert_eq!(report.completed_count(), 1);
    assert_eq!(report.cancelled_count(), 3);
    assert_eq!(invoker.called(), vec!["a"]);
}

/// Test: A timed-out task fails without holding up its sibling
/// Given a slow task and a fast independent task
/// When the per-task timeout is shorter than the slow task
/// Then the slow task fails with a timeout and the fast one completes
#[tokio::test]
async fn test_timeout_does_not_block_siblings() {
    let graph = TaskGraph::from_tasks(vec![
        task("slow", "Implement slow", &[]),
        task("slow-next", "Test slow-next", &["slow"]),
        task("fast", "Implement fast", &[]),
    ])
    .unwrap();
    let invoker = ScriptedInvoker::new(Duration::from_millis(10))
        .slow("slow", Duration::from_secs(10));
    let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone())).with_config(
        ExecutorConfig {
            concurrency: Some(2),
            task_timeout: Duration::from_millis(100),
        },
    );

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        exec.execute(graph, &default_agents()),
    )
    .await
    .expect("run should not wait for the slow task")
    .unwrap();

    assert_eq!(
        report.task(&id("slow")).unwrap().failure,
        Some(FailureReason::Timeout { after_ms: 100 })
    );
    assert!(report.task(&id("slow-next")).unwrap().is_blocked());
    assert_eq!(report.task(&id("fast")).unwrap().status, TaskStatus::Completed);
}

/// Test: A cancelled orchestration is still persisted
#[tokio::test]
async fn test_cancelled_run_is_persisted() {
    let store = TestStore::new();
    let invoker = ScriptedInvoker::instant();
    let orch = Orchestrator::new(
        TaskDecomposer::with_builtin().unwrap(),
        AsyncExecutor::new(keyword(), Arc::new(invoker.clone())),
        default_agents(),
        store.store.clone(),
    );
    orch.cancel();

    let report = orch
        .run(&Request::with_id("f1", Request::FEATURE, "billing"))
        .await
        .unwrap();
    assert_eq!(report.cancelled_count(), 4);
    assert!(invoker.calls().is_empty());

    let state = store.store.load().await.unwrap();
    assert_eq!(state.count_status(TaskStatus::Failed), 4);
    assert_eq!(state.retryable_tasks().len(), 4);
}
