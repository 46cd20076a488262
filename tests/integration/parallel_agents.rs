//! Parallel execution correctness tests.
//!
//! These tests verify that the concurrent executor runs independent
//! branches at the same time while never starting a task before its
//! dependencies complete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use conductor::exec::ExecutorConfig;
use conductor::{
    AsyncExecutor, CapabilityStrategy, Executor, KeywordStrategy, Request, SyncExecutor,
    TaskDecomposer, TaskGraph, TaskStatus,
};

use crate::fixtures::{backends, default_agents, id, overlapped, task, Script, ScriptedInvoker};

fn keyword() -> Arc<KeywordStrategy> {
    Arc::new(KeywordStrategy::with_defaults().unwrap())
}

fn pool(n: usize) -> ExecutorConfig {
    ExecutorConfig {
        concurrency: Some(n),
        ..ExecutorConfig::default()
    }
}

/// Test: Two independent branches finish in about one task's duration
/// Given two tasks with no shared dependencies and a pool of 2
/// When the concurrent executor runs them
/// Then both are dispatched together
#[tokio::test]
async fn test_independent_branches_run_concurrently() {
    let graph = TaskGraph::from_tasks(vec![
        task("left", "Implement left", &[]),
        task("right", "Implement right", &[]),
    ])
    .unwrap();
    let invoker = ScriptedInvoker::new(Duration::from_millis(250));
    let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone())).with_config(pool(2));

    let started = Instant::now();
    let report = exec.execute(graph, &backends(2)).await.unwrap();
    let elapsed = started.elapsed();

    assert!(report.all_completed());
    assert!(overlapped(&invoker.calls(), "left", "right"));
    assert!(
        elapsed < Duration::from_millis(450),
        "two 250ms tasks took {:?}",
        elapsed
    );
}

/// Test: The same graph on the sequential executor takes both durations
#[tokio::test]
async fn test_sequential_executor_does_not_overlap() {
    let graph = TaskGraph::from_tasks(vec![
        task("left", "Implement left", &[]),
        task("right", "Implement right", &[]),
    ])
    .unwrap();
    let invoker = ScriptedInvoker::new(Duration::from_millis(50));
    let exec = SyncExecutor::new(keyword(), Arc::new(invoker.clone()));

    let report = exec.execute(graph, &backends(2)).await.unwrap();
    assert!(report.all_completed());
    assert!(!overlapped(&invoker.calls(), "left", "right"));
}

/// Test: Dependencies gate dispatch in a fan-out/fan-in graph
/// Given root -> (a, b, c) -> join
/// When the concurrent executor runs it
/// Then the branches overlap and join starts after all three
#[tokio::test]
async fn test_fan_out_fan_in() {
    let graph = TaskGraph::from_tasks(vec![
        task("root", "Implement root", &[]),
        task("a", "Implement a", &["root"]),
        task("b", "Implement b", &["root"]),
        task("c", "Implement c", &["root"]),
        task("join", "Implement join", &["a", "b", "c"]),
    ])
    .unwrap();
    let invoker = ScriptedInvoker::new(Duration::from_millis(40));
    let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone()));

    let report = exec.execute(graph, &backends(3)).await.unwrap();

    assert!(report.all_completed());
    assert!(report.trace_respects_dependencies());
    let calls = invoker.calls();
    assert!(overlapped(&calls, "a", "b"));
    assert!(overlapped(&calls, "b", "c"));
    let join = calls.iter().find(|c| c.task.as_str() == "join").unwrap();
    for branch in ["a", "b", "c"] {
        let call = calls.iter().find(|c| c.task.as_str() == branch).unwrap();
        assert!(call.finished <= join.started);
    }
}

/// Test: The pool bound is respected
#[tokio::test]
async fn test_pool_bound_limits_parallelism() {
    let graph = TaskGraph::from_tasks(
        ["t1", "t2", "t3", "t4"]
            .iter()
            .map(|name| task(name, "Implement it", &[])),
    )
    .unwrap();
    let invoker = ScriptedInvoker::new(Duration::from_millis(60));
    let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone())).with_config(pool(2));

    let report = exec.execute(graph, &backends(4)).await.unwrap();
    assert!(report.all_completed());

    // Peak concurrency is reached at some call's start.
    let calls = invoker.calls();
    for call in &calls {
        let active = calls
            .iter()
            .filter(|other| other.started <= call.started && call.started < other.finished)
            .count();
        assert!(active <= 2, "{} calls active when {} started", active, call.task);
    }
}

/// Test: A failed branch does not stop its sibling
#[tokio::test]
async fn test_failure_isolated_to_branch() {
    let graph = TaskGraph::from_tasks(vec![
        task("a1", "Implement a1", &[]),
        task("a2", "Test a2", &["a1"]),
        task("b1", "Implement b1", &[]),
        task("b2", "Test b2", &["b1"]),
    ])
    .unwrap();
    let invoker =
        ScriptedInvoker::new(Duration::from_millis(10)).script("a1", Script::Fail("boom"));
    let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone()));

    let report = exec.execute(graph, &default_agents()).await.unwrap();

    assert_eq!(report.task(&id("b2")).unwrap().status, TaskStatus::Completed);
    assert!(report.task(&id("a2")).unwrap().is_blocked());
    assert_eq!(report.failed_task_ids(), vec![id("a1"), id("a2")]);
}

/// Test: Late binding picks whichever capable agent is idle
/// Given two independent coding tasks and two backend agents
/// When the capability strategy selects at dispatch time
/// Then the tasks land on different agents
#[tokio::test]
async fn test_late_binding_spreads_over_idle_agents() {
    let graph = TaskGraph::from_tasks(vec![
        task("x", "Implement x", &[]).with_capabilities(["code"]),
        task("y", "Implement y", &[]).with_capabilities(["code"]),
    ])
    .unwrap();
    let invoker = ScriptedInvoker::new(Duration::from_millis(50));
    let exec = AsyncExecutor::new(Arc::new(CapabilityStrategy::new()), Arc::new(invoker.clone()));

    let report = exec.execute(graph, &backends(2)).await.unwrap();

    assert!(report.all_completed());
    let x = report.task(&id("x")).unwrap().assigned_agent.clone();
    let y = report.task(&id("y")).unwrap().assigned_agent.clone();
    assert_ne!(x, y);
}

/// Test: Every decomposed request runs clean on the concurrent executor
#[tokio::test]
async fn test_all_builtin_kinds_complete_concurrently() {
    let decomposer = TaskDecomposer::with_builtin().unwrap();
    for kind in [Request::FEATURE, Request::BUGFIX, Request::REFACTOR] {
        let graph = decomposer
            .decompose(&Request::with_id("k", kind, "the cache"))
            .unwrap();
        let invoker = ScriptedInvoker::new(Duration::from_millis(5));
        let exec = AsyncExecutor::new(keyword(), Arc::new(invoker.clone()));

        let report = exec.execute(graph, &default_agents()).await.unwrap();
        assert!(report.all_completed(), "{} did not complete", kind);
        assert!(report.trace_respects_dependencies());
        assert_eq!(report.messages.len(), 8);
    }
}
