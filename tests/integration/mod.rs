//! Integration test suite for conductor.
//!
//! These tests drive the public API end to end: decomposition, both
//! executors, persistence and checkpoints. Agent invocations are scripted
//! so no external agent host is needed.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Requests run through the orchestrator
//! - `parallel_agents`: Concurrent execution correctness
//! - `cancellation`: Cooperative cancellation and timeouts
//! - `recovery`: State persistence, checkpoints and retries

mod fixtures;

mod cancellation;
mod parallel_agents;
mod recovery;
mod workflow_e2e;
