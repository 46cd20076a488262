//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - A scripted agent invoker that records every call
//! - Agent registries and task graphs
//! - Temporary state stores and git repositories

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use git2::{Repository, Signature};
use tempfile::TempDir;

use conductor::error::InvocationError;
use conductor::{
    Agent, AgentInvoker, AgentKind, AgentRegistry, StateStore, Task, TaskGraph, TaskId,
    TaskOutcome,
};

/// What a scripted task does when invoked.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(&'static str),
    Panic,
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub task: TaskId,
    pub agent: Agent,
    pub started: Instant,
    pub finished: Instant,
}

/// Invoker whose behavior is scripted per task id suffix.
///
/// A task whose id ends with a scripted key follows that script; every
/// other task succeeds after `delay`.
#[derive(Debug, Clone)]
pub struct ScriptedInvoker {
    delay: Duration,
    scripts: HashMap<String, (Script, Option<Duration>)>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedInvoker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scripts: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn script(mut self, suffix: &str, script: Script) -> Self {
        self.scripts.insert(suffix.to_string(), (script, None));
        self
    }

    /// Give one task its own delay.
    pub fn slow(mut self, suffix: &str, delay: Duration) -> Self {
        self.scripts
            .insert(suffix.to_string(), (Script::Succeed, Some(delay)));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.task.to_string()).collect()
    }

    fn lookup(&self, id: &TaskId) -> (Script, Duration) {
        self.scripts
            .iter()
            .find(|(suffix, _)| id.as_str().ends_with(suffix.as_str()))
            .map(|(_, (script, delay))| (script.clone(), delay.unwrap_or(self.delay)))
            .unwrap_or((Script::Succeed, self.delay))
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, agent: &Agent, task: &Task) -> Result<TaskOutcome, InvocationError> {
        let started = Instant::now();
        let (script, delay) = self.lookup(&task.id);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(Call {
            task: task.id.clone(),
            agent: agent.clone(),
            started,
            finished: Instant::now(),
        });
        match script {
            Script::Succeed => Ok(TaskOutcome::new(format!("{} done by {}", task.id, agent.id))),
            Script::Fail(message) => Err(InvocationError::Failed(message.to_string())),
            Script::Panic => panic!("scripted panic in {}", task.id),
        }
    }
}

pub fn id(s: &str) -> TaskId {
    TaskId::new(s).unwrap()
}

/// A Planned task with the given dependencies.
pub fn task(name: &str, description: &str, deps: &[&str]) -> Task {
    Task::new(name, description)
        .unwrap()
        .with_dependencies(deps.iter().map(|d| id(d)))
        .unwrap()
}

/// `names[0] <- names[1] <- ...`, each depending on its predecessor.
pub fn chain(names: &[&str]) -> TaskGraph {
    let tasks = names.iter().enumerate().map(|(i, name)| {
        let deps: Vec<&str> = if i == 0 { vec![] } else { vec![names[i - 1]] };
        task(name, &format!("Implement {}", name), &deps)
    });
    TaskGraph::from_tasks(tasks).unwrap()
}

/// `n` backend workers named `backend-1..=n`.
pub fn backends(n: usize) -> AgentRegistry {
    AgentRegistry::new(
        (1..=n)
            .map(|i| {
                Agent::new(format!("backend-{}", i), AgentKind::Backend)
                    .unwrap()
                    .with_capabilities(AgentKind::Backend.default_capabilities())
            })
            .collect(),
    )
    .unwrap()
}

pub fn default_agents() -> AgentRegistry {
    AgentRegistry::with_default_agents().unwrap()
}

/// A state store in a fresh temporary directory.
pub struct TestStore {
    pub temp_dir: TempDir,
    pub store: StateStore,
}

impl TestStore {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = StateStore::new(temp_dir.path().join("state"));
        Self { temp_dir, store }
    }

    pub fn root(&self) -> PathBuf {
        self.store.root().to_path_buf()
    }
}

/// A temporary git repository with one commit. Returns the HEAD sha.
pub fn git_repo() -> (TempDir, String) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo = Repository::init(temp_dir.path()).expect("Failed to init repo");
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let commit_id = repo
        .commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
        .unwrap();
    (temp_dir, commit_id.to_string())
}

/// Whether the recorded runs of `a` and `b` overlapped in time.
pub fn overlapped(calls: &[Call], a: &str, b: &str) -> bool {
    let find = |name: &str| calls.iter().find(|c| c.task.as_str() == name).unwrap();
    let (a, b) = (find(a), find(b));
    a.started < b.finished && b.started < a.finished
}
