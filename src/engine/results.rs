// src/engine/results.rs

//! Routing of drained results.
//!
//! Results either go straight to the coordinator or through an external
//! staging collaborator first (e.g. an object-store upload). The loop only
//! talks to that collaborator through [`ResultStager`].

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::engine::job::JobDescription;
use crate::errors::Result;
use crate::types::OutputEntry;

pub trait ResultStager: Send {
    /// True if the entry must be staged before it can be reported.
    fn needs_staging(&self, entry: &OutputEntry) -> bool;

    /// Take ownership of an entry that needs staging.
    fn submit(&mut self, entry: OutputEntry);

    /// Entries whose staging has completed.
    fn take_staged(&mut self) -> Vec<OutputEntry>;

    /// Everything still held, staged or not. Used for forced drains.
    fn take_all(&mut self) -> Vec<OutputEntry>;

    /// Failed ranges of jobs that write to an object store are also sent
    /// through the stager's own channel.
    fn direct_update(&mut self, _entry: &OutputEntry) {}

    fn stop(&mut self) {}
}

/// Builds a stager for each job.
pub type StagerFactory = Box<dyn Fn(&JobDescription) -> Box<dyn ResultStager> + Send>;

/// Stages nothing; every result is reportable immediately.
#[derive(Debug, Default)]
pub struct ImmediateReporting;

impl ResultStager for ImmediateReporting {
    fn needs_staging(&self, _entry: &OutputEntry) -> bool {
        false
    }

    fn submit(&mut self, entry: OutputEntry) {
        warn!(event_range = %entry.event_range_id, "ImmediateReporting received an entry to stage");
    }

    fn take_staged(&mut self) -> Vec<OutputEntry> {
        Vec::new()
    }

    fn take_all(&mut self) -> Vec<OutputEntry> {
        Vec::new()
    }
}

pub fn immediate_reporting() -> StagerFactory {
    Box::new(|_job| Box::new(ImmediateReporting) as Box<dyn ResultStager>)
}

/// Split drained entries into reportable ones and ones handed to the stager.
///
/// With `forced`, nothing is held back: the stager's backlog is drained too.
pub fn partition_outputs(
    drained: Vec<OutputEntry>,
    stager: &mut dyn ResultStager,
    direct_failures: bool,
    forced: bool,
) -> Vec<OutputEntry> {
    let mut reportable = Vec::with_capacity(drained.len());

    for entry in drained {
        if !forced && stager.needs_staging(&entry) {
            stager.submit(entry);
            continue;
        }
        if direct_failures && entry.is_error() {
            stager.direct_update(&entry);
        }
        reportable.push(entry);
    }

    reportable.extend(stager.take_staged());
    if forced {
        reportable.extend(stager.take_all());
    }
    reportable
}

/// Write entries that could not be reported to
/// `<dir>/node_<id>_<unix-ts>.dump`, one `<id> <status> <output>` per line.
pub fn dump_undelivered(dir: &Path, node_id: u32, entries: &[OutputEntry]) -> Result<PathBuf> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("node_{}_{}.dump", node_id, ts));

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    for e in entries {
        writeln!(file, "{} {} {}", e.event_range_id, e.status, e.output)?;
    }

    info!(path = %path.display(), count = entries.len(), "undelivered results dumped");
    Ok(path)
}
