// src/supervisor/core.rs

//! Pure supervisor state machine.
//!
//! `SupervisorCore` holds the pending-batch FIFO, the range table, the
//! demand counters and the completed-output queue. It performs no IO: the
//! async shell in [`super::WorkUnitSupervisor`] feeds it worker messages and
//! sends the dispatches it returns. Time is passed in explicitly so the core
//! can be driven deterministically from tests.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::supervisor::messages::{MessageParser, WorkerMessage, classify};
use crate::supervisor::table::EventRangeTable;
use crate::types::{
    EventRange, EventRangeRecord, NO_MORE_EVENTS, OutputEntry, STATUS_FINISHED, WorkBatch,
};

/// Global supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Running,
    /// The sentinel went out; the worker has until the deadline to finish.
    DrainingToTerminate,
    Terminated,
}

/// What a single worker message did to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEffect {
    Ready,
    Finished(String),
    Failed {
        event_range_id: String,
        acronym: String,
        fatal: bool,
    },
    Ignored,
}

/// One outbound message produced by the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub wire: String,
    pub sentinel: bool,
    pub ids: Vec<String>,
}

pub struct SupervisorCore {
    cores: u32,
    drain_timeout: Duration,
    parser: Box<dyn MessageParser>,
    table: EventRangeTable,
    pending: VecDeque<WorkBatch>,
    outputs: VecDeque<OutputEntry>,
    phase: SupervisorPhase,
    drain_deadline: Option<Instant>,
    no_more_work: bool,
    worker_ready: bool,
    /// Ready signals minus inserted ranges; may go negative.
    worker_need: i64,
    inserted: u64,
    produced: u64,
    processed: u64,
    queued: u64,
    first_message_at: Option<Instant>,
}

impl fmt::Debug for SupervisorCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorCore")
            .field("cores", &self.cores)
            .field("phase", &self.phase)
            .field("pending", &self.pending.len())
            .field("outputs", &self.outputs.len())
            .field("no_more_work", &self.no_more_work)
            .field("worker_ready", &self.worker_ready)
            .field("inserted", &self.inserted)
            .field("produced", &self.produced)
            .finish_non_exhaustive()
    }
}

impl SupervisorCore {
    pub fn new(cores: u32, drain_timeout: Duration, parser: Box<dyn MessageParser>) -> Self {
        Self {
            cores,
            drain_timeout,
            parser,
            table: EventRangeTable::new(),
            pending: VecDeque::new(),
            outputs: VecDeque::new(),
            phase: SupervisorPhase::Running,
            drain_deadline: None,
            no_more_work: false,
            worker_ready: false,
            worker_need: 0,
            inserted: 0,
            produced: 0,
            processed: 0,
            queued: 0,
            first_message_at: None,
        }
    }

    /// Append one batch to the pending FIFO.
    ///
    /// Returns false when the batch was rejected because the sentinel has
    /// already been inserted.
    pub fn insert_batch(&mut self, batch: WorkBatch) -> bool {
        if self.no_more_work {
            warn!(ids = ?batch.ids(), "batch inserted after no-more-work; dropping");
            return false;
        }

        match &batch {
            WorkBatch::NoMoreWork => {
                info!("no more work for this job");
                self.no_more_work = true;
                self.worker_need = 0;
            }
            WorkBatch::Ranges(ranges) => {
                for range in ranges {
                    self.table.register(&range.id);
                    self.inserted += 1;
                    self.worker_need -= 1;
                }
            }
        }

        self.pending.push_back(batch);
        true
    }

    /// Insert ranges as returned by the coordinator, one batch per range.
    pub fn insert_ranges(&mut self, ranges: Vec<EventRange>) {
        debug!(count = ranges.len(), "inserting event ranges");
        for range in ranges {
            self.insert_batch(WorkBatch::Ranges(vec![range]));
        }
    }

    /// How many more ranges the worker pool can take right now.
    pub fn needed_units(&self) -> u64 {
        if self.no_more_work {
            return 0;
        }
        let occupancy = self.produced as i64 + self.cores as i64 - self.inserted as i64;
        if occupancy > 0 {
            return occupancy as u64;
        }
        self.worker_need.max(0) as u64
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn worker_ready(&self) -> bool {
        self.worker_ready
    }

    /// Pop the next batch for the worker.
    ///
    /// Only meaningful when the worker has signalled ready; the shell checks
    /// that together with group liveness.
    pub fn next_dispatch(&mut self, now: Instant) -> Result<Option<Dispatch>> {
        let Some(front) = self.pending.front() else {
            return Ok(None);
        };
        let wire = front.to_wire()?;

        let Some(batch) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.worker_ready = false;

        let ids: Vec<String> = batch.ids().into_iter().map(str::to_string).collect();
        let sentinel = batch.is_sentinel();

        if sentinel {
            self.enter_draining(now);
        } else {
            for id in &ids {
                self.table.mark_processing(id);
            }
            self.queued += ids.len() as u64;
        }

        Ok(Some(Dispatch {
            wire,
            sentinel,
            ids,
        }))
    }

    /// Sentinel sent outside the FIFO during a final flush.
    pub fn flush_sentinel(&mut self, now: Instant) -> Dispatch {
        self.worker_ready = false;
        self.no_more_work = true;
        self.enter_draining(now);
        Dispatch {
            wire: NO_MORE_EVENTS.to_string(),
            sentinel: true,
            ids: Vec::new(),
        }
    }

    fn enter_draining(&mut self, now: Instant) {
        if self.phase == SupervisorPhase::Running {
            let deadline = now + self.drain_timeout;
            info!(timeout = ?self.drain_timeout, "no-more-work dispatched; draining worker");
            self.phase = SupervisorPhase::DrainingToTerminate;
            self.drain_deadline = Some(deadline);
        }
    }

    /// Interpret one raw worker message.
    ///
    /// A result or error that names no known range is returned as an error
    /// and leaves the counters consistent with what was already applied.
    pub fn handle_message(&mut self, raw: &str, now: Instant) -> Result<MessageEffect> {
        if self.first_message_at.is_none() {
            self.first_message_at = Some(now);
        }

        match classify(raw, self.parser.as_ref())? {
            WorkerMessage::Ready => {
                self.worker_ready = true;
                self.worker_need += 1;
                Ok(MessageEffect::Ready)
            }
            WorkerMessage::Result { event_range_id } => {
                self.processed += 1;
                self.produced += 1;
                if self.table.mark_finished(&event_range_id, raw)? {
                    self.outputs
                        .push_back(OutputEntry::new(&event_range_id, STATUS_FINISHED, raw));
                }
                Ok(MessageEffect::Finished(event_range_id))
            }
            WorkerMessage::Error(report) => {
                error!(acronym = %report.acronym, id = ?report.event_range_id, diagnostics = %report.diagnostics, "worker reported an error");
                let fatal = report.is_fatal();
                let id = report.event_range_id.unwrap_or_default();

                let record = if id.is_empty() {
                    true
                } else {
                    self.table.mark_failed(&id, &report.acronym, raw)?
                };
                if record {
                    self.outputs
                        .push_back(OutputEntry::new(&id, &report.acronym, raw));
                }

                Ok(MessageEffect::Failed {
                    event_range_id: id,
                    acronym: report.acronym,
                    fatal,
                })
            }
            WorkerMessage::Unrecognized => {
                warn!(message = %raw, "unrecognized worker message");
                Ok(MessageEffect::Ignored)
            }
        }
    }

    pub fn drain_expired(&self, now: Instant) -> bool {
        self.phase == SupervisorPhase::DrainingToTerminate
            && self.drain_deadline.is_some_and(|d| now >= d)
    }

    pub fn mark_terminated(&mut self) {
        self.phase = SupervisorPhase::Terminated;
    }

    /// Remove and return everything in the completed-output queue, oldest
    /// first.
    pub fn take_outputs(&mut self) -> Vec<OutputEntry> {
        self.outputs.drain(..).collect()
    }

    pub fn pending_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    pub fn phase(&self) -> SupervisorPhase {
        self.phase
    }

    pub fn no_more_work(&self) -> bool {
        self.no_more_work
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn inserted_count(&self) -> u64 {
        self.inserted
    }

    pub fn processed_count(&self) -> u64 {
        self.processed
    }

    pub fn queued_count(&self) -> u64 {
        self.queued
    }

    pub fn first_message_at(&self) -> Option<Instant> {
        self.first_message_at
    }

    pub fn record(&self, id: &str) -> Option<&EventRangeRecord> {
        self.table.get(id)
    }

    pub fn table(&self) -> &EventRangeTable {
        &self.table
    }
}
