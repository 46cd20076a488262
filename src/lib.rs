pub mod config;
pub mod core;
pub mod decompose;
pub mod error;
pub mod exec;
pub mod log;
pub mod orchestrator;
pub mod selection;
pub mod state;
pub mod util;

pub use crate::core::{
    Agent, AgentId, AgentKind, AgentRegistry, AgentStatus, FailureReason, Message, Task, TaskGraph,
    TaskId, TaskStatus,
};
pub use decompose::{Request, TaskDecomposer};
pub use error::{Error, OrchestratorError, Result};
pub use exec::{
    AgentInvoker, AsyncExecutor, ExecutionMode, ExecutionReport, Executor, ExecutorConfig,
    SyncExecutor, TaskOutcome,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use selection::{CapabilityStrategy, KeywordStrategy, SelectionStrategy};
pub use state::{Checkpoint, CheckpointId, State, StateStore};
