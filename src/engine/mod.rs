// src/engine/mod.rs

//! Demand-driven execution loop.
//!
//! This module ties together:
//! - job descriptions and their hooks ([`job`])
//! - routing of drained results to the coordinator ([`results`])
//! - heartbeat payloads and the per-node metrics file ([`metrics`])
//! - the control loop itself ([`execution_loop`])

pub mod execution_loop;
pub mod job;
pub mod metrics;
pub mod results;

pub use execution_loop::ExecutionLoop;
pub use job::JobDescription;
pub use metrics::{HeartbeatMetrics, MetricsFile};
pub use results::{ImmediateReporting, ResultStager, StagerFactory};

/// Where the execution loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    FetchingJob,
    SettingUp,
    Running,
    Draining,
    Stopping,
    Finished,
}

/// Why the execution loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The coordinator never handed out a job.
    NoJob,
    /// Jobs ran until the coordinator had none left.
    Completed,
    /// A shutdown signal was handled.
    Stopped,
    TooManyFailures,
}

impl LoopExit {
    pub fn exit_code(self) -> i32 {
        match self {
            LoopExit::Completed | LoopExit::Stopped => 0,
            LoopExit::TooManyFailures => 1,
            LoopExit::NoJob => 2,
        }
    }
}

/// Result of running a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { exit_code: i32, failed: bool },
    SetupFailed,
    Stopped,
}
