// src/engine/metrics.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::supervisor::AccountingSnapshot;

/// Heartbeat payload: the supervisor's snapshot plus per-job extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatMetrics {
    pub job_id: String,
    pub node_id: u32,

    /// Seconds since the job was set up.
    pub total_time: f64,

    /// `total_time * cores / max(1, processed)`.
    pub avg_time_per_event: f64,

    #[serde(flatten)]
    pub accounting: AccountingSnapshot,
}

impl HeartbeatMetrics {
    pub fn new(job_id: &str, node_id: u32, total_time: f64, accounting: AccountingSnapshot) -> Self {
        let processed = accounting.processed_events.max(1) as f64;
        let avg_time_per_event = total_time * accounting.cores as f64 / processed;
        Self {
            job_id: job_id.to_string(),
            node_id,
            total_time,
            avg_time_per_event,
            accounting,
        }
    }
}

/// Per-node metrics file: a JSON object keyed by job id, rewritten on every
/// heartbeat.
#[derive(Debug)]
pub struct MetricsFile {
    path: PathBuf,
    by_job: BTreeMap<String, HeartbeatMetrics>,
}

impl MetricsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            by_job: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, metrics: HeartbeatMetrics) -> Result<()> {
        self.by_job.insert(metrics.job_id.clone(), metrics);

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.by_job)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), jobs = self.by_job.len(), "metrics file updated");
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Option<&HeartbeatMetrics> {
        self.by_job.get(job_id)
    }
}
