// src/process/mod.rs

//! Worker process management.
//!
//! - [`children`]: launching the worker and auxiliary processes as group
//!   leaders, and tearing them down from inside the bridge task.
//! - [`group`]: the supervisor's handle with the termination cascade.
//! - [`tree`]: process-table scans and signal helpers.

pub mod children;
pub mod group;
pub mod tree;

pub use children::{LaunchSpec, WorkerProcesses};
pub use group::WorkerProcessGroup;
