//! Core domain model: agents, tasks, messages and the task graph.
//!
//! Every value here is immutable from the outside. Changes produce a new
//! value that the caller records back into the graph or registry.

pub mod agent;
pub mod dag;
pub mod message;
pub mod registry;
pub mod task;

pub use agent::{Agent, AgentId, AgentKind, AgentStatus};
pub use dag::TaskGraph;
pub use message::Message;
pub use registry::AgentRegistry;
pub use task::{FailureReason, Task, TaskId, TaskStatus};
