// src/supervisor/mod.rs

//! Work-unit supervisor.
//!
//! - [`table`]: per-range lifecycle records.
//! - [`messages`]: decoding of the worker's line protocol.
//! - [`accounting`]: job timing and CPU estimation.
//! - [`core`]: the pure state machine (pending batches, demand, outputs).
//! - [`runtime`]: the async shell that owns the worker group.

pub mod accounting;
pub mod core;
pub mod messages;
pub mod runtime;
pub mod table;

use std::time::Duration;

use crate::bridge::BridgeSettings;
use crate::config::{NodeConfig, TerminationPolicy};

pub use accounting::AccountingSnapshot;
pub use self::core::{Dispatch, MessageEffect, SupervisorCore, SupervisorPhase};
pub use messages::{DefaultMessageParser, ErrorReport, MessageParser, WorkerMessage};
pub use runtime::WorkUnitSupervisor;
pub use table::EventRangeTable;

/// Result of one [`WorkUnitSupervisor::poll`] tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    /// No more work was sent or termination is under way.
    Draining,
    Dead,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub cores: u32,
    pub drain_timeout: Duration,
    pub cpu_sample_interval: Duration,
    pub bridge: BridgeSettings,
    pub termination: TerminationPolicy,
}

impl SupervisorSettings {
    pub fn from_config(config: &NodeConfig, cores: u32) -> Self {
        let worker = &config.worker;
        Self {
            cores,
            drain_timeout: worker.drain_timeout,
            cpu_sample_interval: config.run_loop.cpu_sample_interval,
            bridge: BridgeSettings {
                reader_backoff: worker.reader_backoff,
                liveness_interval: worker.liveness_interval,
                child_kill_grace: worker.termination.child_kill_grace,
            },
            termination: worker.termination,
        }
    }
}
