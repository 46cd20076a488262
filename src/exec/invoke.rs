//! Agent capability invocation.
//!
//! The engine never reasons about task content. It hands a task to an
//! external host through `AgentInvoker` and records what comes back.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::core::agent::Agent;
use crate::core::task::{FailureReason, Task};
use crate::error::InvocationError;

/// What an agent produced for a task. Opaque to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskOutcome {
    pub output: String,
}

impl TaskOutcome {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

/// Call into the external reasoning host.
///
/// Implementations may take arbitrarily long; the executor applies the
/// dispatch timeout around the returned future.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent: &Agent, task: &Task) -> Result<TaskOutcome, InvocationError>;
}

/// Runs an external command per task: `<program> <args...> <description>`.
///
/// The child is killed if the invocation is dropped, so a dispatch timeout
/// terminates it.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandInvoker {
    /// Parse a command line such as `"claude -p"`. Arguments are split on
    /// whitespace.
    pub fn new(command: &str) -> Result<Self, InvocationError> {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| InvocationError::Failed("agent command is empty".to_string()))?;
        Ok(Self {
            program: PathBuf::from(program),
            args: parts.map(String::from).collect(),
            cwd: None,
        })
    }

    /// Run the command in `dir` instead of the current directory.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Whether the program resolves on `PATH`.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

#[async_trait]
impl AgentInvoker for CommandInvoker {
    async fn invoke(&self, agent: &Agent, task: &Task) -> Result<TaskOutcome, InvocationError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(&task.description)
            .env("CONDUCTOR_TASK_ID", task.id.as_str())
            .env("CONDUCTOR_AGENT_ID", agent.id.as_str())
            .env("CONDUCTOR_AGENT_KIND", agent.kind.as_str())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        debug!(
            task = %task.id,
            agent = %agent.id,
            program = %self.program.display(),
            "Spawning agent command"
        );
        let output = command.output().await?;

        if !output.status.success() {
            return Err(InvocationError::Exited {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(TaskOutcome::new(
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
        ))
    }
}

type InvokeFn = dyn Fn(Agent, Task) -> BoxFuture<'static, Result<TaskOutcome, InvocationError>>
    + Send
    + Sync;

/// Adapts an async closure into an invoker.
#[derive(Clone)]
pub struct FnInvoker {
    f: Arc<InvokeFn>,
}

impl FnInvoker {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Agent, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome, InvocationError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |agent, task| f(agent, task).boxed()),
        }
    }
}

impl std::fmt::Debug for FnInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvoker").finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentInvoker for FnInvoker {
    async fn invoke(&self, agent: &Agent, task: &Task) -> Result<TaskOutcome, InvocationError> {
        (self.f)(agent.clone(), task.clone()).await
    }
}

/// Invoke with a deadline, turning every failure mode into a `FailureReason`.
///
/// Panics inside the invoker are caught and recorded as task errors.
pub(crate) async fn dispatch(
    invoker: Arc<dyn AgentInvoker>,
    agent: Agent,
    task: Task,
    limit: Duration,
) -> Result<TaskOutcome, FailureReason> {
    let call = AssertUnwindSafe(async move { invoker.invoke(&agent, &task).await }).catch_unwind();
    match tokio::time::timeout(limit, call).await {
        Err(_) => Err(timeout_reason(limit)),
        Ok(Err(panic)) => Err(FailureReason::error(format!(
            "agent panicked: {}",
            panic_message(&*panic)
        ))),
        Ok(Ok(Err(InvocationError::Timeout(after)))) => Err(timeout_reason(after)),
        Ok(Ok(Err(err))) => Err(FailureReason::error(err.to_string())),
        Ok(Ok(Ok(outcome))) => Ok(outcome),
    }
}

fn timeout_reason(after: Duration) -> FailureReason {
    FailureReason::Timeout {
        after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
