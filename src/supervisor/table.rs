// src/supervisor/table.rs

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::errors::{DroidError, Result};
use crate::types::{EventRangeRecord, EventRangeStatus};

/// One record per event-range id.
///
/// Transitions only move forward: `New -> Processing -> Finished | Failed`
/// (a range may also fail or finish straight from `New`). Terminal records
/// never change again.
#[derive(Debug, Default)]
pub struct EventRangeTable {
    records: HashMap<String, EventRangeRecord>,
}

impl EventRangeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `New` record. Returns false and keeps the existing record if the
    /// id is already known.
    pub fn register(&mut self, id: &str) -> bool {
        if self.records.contains_key(id) {
            warn!(id, "event range registered twice; keeping existing record");
            return false;
        }
        self.records
            .insert(id.to_string(), EventRangeRecord::new(id));
        true
    }

    pub fn mark_processing(&mut self, id: &str) {
        match self.records.get_mut(id) {
            Some(rec) if rec.status == EventRangeStatus::New => {
                rec.status = EventRangeStatus::Processing;
            }
            Some(rec) => debug!(id, status = %rec.status, "range already past New; not re-dispatching"),
            None => warn!(id, "dispatching unknown range"),
        }
    }

    /// Record a result. `Ok(false)` for a duplicate report on a terminal
    /// record; an unknown id is a `ParseError`.
    pub fn mark_finished(&mut self, id: &str, output: &str) -> Result<bool> {
        self.finish(id, EventRangeStatus::Finished, output, None)
    }

    pub fn mark_failed(&mut self, id: &str, acronym: &str, output: &str) -> Result<bool> {
        self.finish(id, EventRangeStatus::Failed, output, Some(acronym))
    }

    fn finish(
        &mut self,
        id: &str,
        status: EventRangeStatus,
        output: &str,
        acronym: Option<&str>,
    ) -> Result<bool> {
        let rec = self.records.get_mut(id).ok_or_else(|| {
            DroidError::ParseError(format!("worker reported unknown event range '{}'", id))
        })?;

        if rec.status.is_terminal() {
            warn!(id, current = %rec.status, reported = %status, "duplicate report for terminal range; ignoring");
            return Ok(false);
        }

        rec.status = status;
        rec.output = Some(output.to_string());
        rec.error_acronym = acronym.map(str::to_string);
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<&EventRangeRecord> {
        self.records.get(id)
    }

    pub fn count(&self, status: EventRangeStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
