// src/supervisor/accounting.rs

//! Job timing and CPU accounting.
//!
//! CPU consumption is estimated from three sources:
//! - the worker's `jobReport.json`, when it exists and reports at least 10s;
//! - the children CPU times of this process (only covers reaped children);
//! - the per-PID maximum of `/proc` CPU ticks over every descendant of the
//!   worker and auxiliary processes.
//!
//! The descendant sum wins when the group was force-killed (no job report is
//! written then) or when it exceeds the other estimate by more than 10%.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::process::tree;

pub const JOB_REPORT: &str = "jobReport.json";

const MIN_REPORTED_CPU: f64 = 10.0;
const DESCENDANT_MARGIN: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountingSnapshot {
    pub start_time: f64,
    pub ready_time: Option<f64>,
    pub end_time: Option<f64>,
    pub setup_time: f64,
    pub running_time: f64,
    pub cores: u32,
    pub cpu_consumption_time: f64,
    pub queued_events: u64,
    pub processed_events: u64,
}

/// Start, ready and end instants of one job.
#[derive(Debug, Clone)]
pub struct JobClock {
    started: Instant,
    started_wall: SystemTime,
    ended: Option<Instant>,
}

impl JobClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: SystemTime::now(),
            ended: None,
        }
    }

    /// Record the end time. Only the first call has an effect.
    pub fn mark_ended(&mut self, now: Instant) -> bool {
        if self.ended.is_some() {
            return false;
        }
        self.ended = Some(now);
        true
    }

    pub fn ended(&self) -> Option<Instant> {
        self.ended
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    fn unix_secs(&self, at: Instant) -> f64 {
        let wall = self.started_wall + at.saturating_duration_since(self.started);
        wall.duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn snapshot(&self, ready: Option<Instant>, now: Instant, counters: Counters) -> AccountingSnapshot {
        let end = self.ended.unwrap_or(now);
        let setup_time = ready
            .unwrap_or(now)
            .saturating_duration_since(self.started)
            .as_secs_f64();
        let running_time = ready
            .map(|r| end.saturating_duration_since(r).as_secs_f64())
            .unwrap_or(0.0);

        AccountingSnapshot {
            start_time: self.unix_secs(self.started),
            ready_time: ready.map(|r| self.unix_secs(r)),
            end_time: self.ended.map(|e| self.unix_secs(e)),
            setup_time,
            running_time,
            cores: counters.cores,
            cpu_consumption_time: counters.cpu_seconds,
            queued_events: counters.queued,
            processed_events: counters.processed,
        }
    }
}

/// Counter values folded into a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub cores: u32,
    pub cpu_seconds: f64,
    pub queued: u64,
    pub processed: u64,
}

/// Sum of `resource.executor.*.cpuTime` in the worker's job report.
pub fn job_report_cpu(work_dir: &Path) -> Option<f64> {
    let contents = std::fs::read_to_string(work_dir.join(JOB_REPORT)).ok()?;
    let report: Value = serde_json::from_str(&contents).ok()?;
    let executors = report.get("resource")?.get("executor")?.as_object()?;
    Some(
        executors
            .values()
            .filter_map(|e| e.get("cpuTime").and_then(Value::as_f64))
            .sum(),
    )
}

/// User + system CPU seconds of reaped children of this process.
pub fn children_cpu_seconds() -> f64 {
    let mut tms = libc::tms {
        tms_utime: 0,
        tms_stime: 0,
        tms_cutime: 0,
        tms_cstime: 0,
    };
    unsafe { libc::times(&mut tms) };
    (tms.tms_cutime + tms.tms_cstime) as f64 / tree::clock_ticks()
}

/// Where the estimator looks.
#[derive(Debug, Clone)]
pub struct CpuSources {
    pub work_dir: PathBuf,
    pub proc_root: PathBuf,
    /// Worker and auxiliary pids.
    pub roots: Vec<u32>,
    pub killed: Arc<AtomicBool>,
}

/// Stateful CPU estimate; never decreases.
#[derive(Debug, Default)]
pub struct CpuEstimator {
    baseline_children: f64,
    per_pid_max: HashMap<u32, f64>,
    consumption: f64,
}

impl CpuEstimator {
    pub fn new(baseline_children: f64) -> Self {
        Self {
            baseline_children,
            ..Self::default()
        }
    }

    pub fn consumption(&self) -> f64 {
        self.consumption
    }

    pub fn sample(&mut self, sources: &CpuSources, children_now: f64) -> f64 {
        let reported = job_report_cpu(&sources.work_dir)
            .filter(|cpu| *cpu >= MIN_REPORTED_CPU)
            .unwrap_or(0.0);
        let times_delta = (children_now - self.baseline_children).max(0.0);
        let mut cpu = reported.max(times_delta);

        let descendant_sum = self.descendant_sum(sources);
        let killed = sources.killed.load(Ordering::SeqCst);
        if killed || cpu < descendant_sum * DESCENDANT_MARGIN {
            cpu = descendant_sum;
        }

        if cpu > self.consumption {
            self.consumption = cpu;
        }
        debug!(reported, times_delta, descendant_sum, killed, consumption = self.consumption, "cpu sample");
        self.consumption
    }

    /// Sum over every descendant ever seen of its largest CPU reading.
    pub fn descendant_sum(&mut self, sources: &CpuSources) -> f64 {
        let ticks = tree::clock_ticks();

        for root in &sources.roots {
            for pid in tree::descendants(*root, &sources.proc_root) {
                let Some(stat) = tree::read_stat(pid, &sources.proc_root) else {
                    continue;
                };
                let secs = stat.cpu_ticks as f64 / ticks;
                let max = self.per_pid_max.entry(pid).or_insert(0.0);
                if secs > *max {
                    *max = secs;
                }
            }
        }

        self.per_pid_max.values().sum()
    }
}

/// Background task that refreshes the CPU estimate periodically.
#[derive(Debug)]
pub struct CpuSampler {
    consumption: Arc<AtomicU64>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CpuSampler {
    /// Start sampling immediately and then once per `every`.
    pub fn spawn(sources: CpuSources, every: Duration) -> Self {
        let consumption = Arc::new(AtomicU64::new(0f64.to_bits()));
        let stop = CancellationToken::new();

        let published = Arc::clone(&consumption);
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            let mut estimator = CpuEstimator::new(children_cpu_seconds());
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let cpu = estimator.sample(&sources, children_cpu_seconds());
                        published.store(cpu.to_bits(), Ordering::SeqCst);
                    }
                }
            }

            // Final reading once the group is gone.
            let cpu = estimator.sample(&sources, children_cpu_seconds());
            published.store(cpu.to_bits(), Ordering::SeqCst);
            debug!(cpu, "cpu sampler stopped");
        });

        Self {
            consumption,
            stop,
            handle: Some(handle),
        }
    }

    pub fn current(&self) -> f64 {
        f64::from_bits(self.consumption.load(Ordering::SeqCst))
    }

    /// Ask the sampler to take its final reading and exit.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// Stop the sampler and wait for its final reading.
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "cpu sampler task failed");
            }
        }
    }
}
