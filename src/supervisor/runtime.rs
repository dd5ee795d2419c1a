// src/supervisor/runtime.rs

use std::fmt;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::bridge::{MessageBridge, WorkerTransport};
use crate::errors::Result;
use crate::process::{LaunchSpec, WorkerProcessGroup};
use crate::supervisor::accounting::{AccountingSnapshot, Counters, CpuSampler, CpuSources, JobClock};
use crate::supervisor::core::{Dispatch, MessageEffect, SupervisorCore, SupervisorPhase};
use crate::supervisor::messages::MessageParser;
use crate::supervisor::{PollStatus, SupervisorSettings};
use crate::types::{EventRange, EventRangeRecord, OutputEntry, WorkBatch};

/// Owns one worker group for the lifetime of a job.
///
/// This is the IO shell around [`SupervisorCore`]: it moves raw messages from
/// the bridge into the core, sends the core's dispatches to the worker and
/// drives the termination cascade.
pub struct WorkUnitSupervisor {
    core: SupervisorCore,
    bridge: MessageBridge,
    group: WorkerProcessGroup,
    clock: JobClock,
    sampler: CpuSampler,
}

impl fmt::Debug for WorkUnitSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnitSupervisor")
            .field("core", &self.core)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl WorkUnitSupervisor {
    /// Launch the worker group and start CPU sampling.
    pub fn start(
        settings: &SupervisorSettings,
        launch: &LaunchSpec,
        transport: Box<dyn WorkerTransport>,
        parser: Box<dyn MessageParser>,
    ) -> Result<Self> {
        let clock = JobClock::start();
        let (bridge, endpoints) = MessageBridge::new();

        let group = WorkerProcessGroup::start(
            launch,
            transport,
            endpoints,
            bridge.command_sender(),
            settings.bridge,
            settings.termination,
        )?;

        let sources = CpuSources {
            work_dir: launch.work_dir.clone(),
            proc_root: launch.proc_root.clone(),
            roots: [group.worker_pid(), group.aux_pid()]
                .into_iter()
                .flatten()
                .collect(),
            killed: group.killed_flag(),
        };
        let sampler = CpuSampler::spawn(sources, settings.cpu_sample_interval);

        info!(cores = settings.cores, "supervisor started");

        Ok(Self {
            core: SupervisorCore::new(settings.cores, settings.drain_timeout, parser),
            bridge,
            group,
            clock,
            sampler,
        })
    }

    pub fn insert_batch(&mut self, batch: WorkBatch) -> bool {
        self.core.insert_batch(batch)
    }

    pub fn insert_ranges(&mut self, ranges: Vec<EventRange>) {
        self.core.insert_ranges(ranges)
    }

    pub fn needed_units(&self) -> u64 {
        self.core.needed_units()
    }

    pub fn is_ready_to_dispatch(&mut self) -> bool {
        self.core.has_pending() && self.core.worker_ready() && self.group.is_alive()
    }

    /// Pop one batch and hand it to the bridge.
    pub fn dispatch_next(&mut self) -> Result<Option<Dispatch>> {
        let Some(dispatch) = self.core.next_dispatch(Instant::now())? else {
            return Ok(None);
        };
        debug!(ids = ?dispatch.ids, sentinel = dispatch.sentinel, "dispatching to worker");
        self.bridge.send(dispatch.wire.clone())?;
        Ok(Some(dispatch))
    }

    /// Handle one inbound message. Returns false if none was waiting.
    pub async fn handle_one_message(&mut self) -> Result<bool> {
        let Some(raw) = self.bridge.try_next() else {
            return Ok(false);
        };

        if let MessageEffect::Failed {
            fatal: true,
            acronym,
            event_range_id,
        } = self.core.handle_message(&raw, Instant::now())?
        {
            error!(%acronym, event_range = %event_range_id, "fatal worker error; terminating group");
            self.terminate().await;
        }
        Ok(true)
    }

    async fn drain_inbound(&mut self) -> Result<()> {
        while self.handle_one_message().await? {}
        Ok(())
    }

    /// One supervisory tick.
    pub async fn poll(&mut self) -> Result<PollStatus> {
        if self.is_dead() {
            self.terminate().await;
            self.drain_inbound().await?;
            return Ok(PollStatus::Dead);
        }

        self.drain_inbound().await?;

        match self.core.phase() {
            SupervisorPhase::DrainingToTerminate => {
                if self.core.drain_expired(Instant::now()) {
                    warn!("worker did not finish after no-more-work; terminating");
                    self.terminate().await;
                }
                Ok(PollStatus::Draining)
            }
            SupervisorPhase::Terminated => Ok(PollStatus::Draining),
            SupervisorPhase::Running => {
                while self.is_ready_to_dispatch() {
                    match self.dispatch_next()? {
                        Some(d) if d.sentinel => return Ok(PollStatus::Draining),
                        Some(_) => {}
                        None => break,
                    }
                }
                Ok(PollStatus::Running)
            }
        }
    }

    /// Best-effort final drain before shutdown.
    ///
    /// Tells a waiting worker that nothing else is coming, then interprets
    /// every message still queued. Parse failures are logged and skipped so
    /// that later results are not lost.
    pub async fn flush(&mut self) {
        if self.core.worker_ready() && self.group.is_alive() {
            let dispatch = self.core.flush_sentinel(Instant::now());
            if let Err(e) = self.bridge.send(dispatch.wire) {
                warn!(error = %e, "could not send no-more-work during flush");
            }
        }

        loop {
            match self.handle_one_message().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => warn!(error = %e, "dropping unparseable message during flush"),
            }
        }

        self.sampler.stop().await;
        debug!(outputs = self.core.pending_outputs(), "supervisor flushed");
    }

    /// True once the worker group has died. The first true result records
    /// the end time; later calls change nothing.
    pub fn is_dead(&mut self) -> bool {
        if self.group.is_alive() {
            return false;
        }
        if self.clock.mark_ended(Instant::now()) {
            info!(exit_code = ?self.group.poll_exit(), "worker group is dead");
            self.sampler.cancel();
        }
        true
    }

    pub async fn terminate(&mut self) {
        self.group.terminate().await;
        self.core.mark_terminated();
    }

    pub async fn kill(&mut self) {
        self.group.kill().await;
        self.core.mark_terminated();
    }

    pub fn take_outputs(&mut self) -> Vec<OutputEntry> {
        self.core.take_outputs()
    }

    pub fn accounting(&self) -> AccountingSnapshot {
        let counters = Counters {
            cores: self.core.cores(),
            cpu_seconds: self.sampler.current(),
            queued: self.core.queued_count(),
            processed: self.core.processed_count(),
        };
        self.clock
            .snapshot(self.core.first_message_at(), Instant::now(), counters)
    }

    /// Worker exit code once the group is dead.
    pub fn child_ret_status(&mut self) -> Option<i32> {
        self.group.poll_exit()
    }

    pub fn record(&self, id: &str) -> Option<&EventRangeRecord> {
        self.core.record(id)
    }

    pub fn core(&self) -> &SupervisorCore {
        &self.core
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.group.worker_pid()
    }
}
