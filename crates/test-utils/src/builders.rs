#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use eventdroid::config::{
    CoordinatorSettings, LoopSettings, NodeConfig, TerminationPolicy, WorkerSettings,
};
use eventdroid::engine::JobDescription;
use eventdroid::types::EventRange;
use serde_json::{json, Value};

/// Builder for `NodeConfig` with timings short enough for tests.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            config: NodeConfig {
                node_id: 0,
                work_dir: work_dir.to_path_buf(),
                coordinator: CoordinatorSettings {
                    exchange_dir: work_dir.join("exchange"),
                    poll_interval: Duration::from_millis(10),
                    max_request_failures: 30,
                },
                worker: WorkerSettings {
                    socket_name: "EventService_EventRanges".to_string(),
                    reader_backoff: Duration::from_millis(5),
                    liveness_interval: Duration::from_millis(20),
                    termination: fast_termination(),
                    drain_timeout: Duration::from_secs(5),
                },
                run_loop: LoopSettings {
                    heartbeat_interval: Duration::from_secs(60),
                    idle_sleep: Duration::from_millis(1),
                    cpu_sample_interval: Duration::from_secs(60),
                    max_failed_jobs: 2,
                },
            },
        }
    }

    pub fn node_id(mut self, id: u32) -> Self {
        self.config.node_id = id;
        self
    }

    pub fn exchange_dir(mut self, dir: PathBuf) -> Self {
        self.config.coordinator.exchange_dir = dir;
        self
    }

    pub fn max_request_failures(mut self, n: u32) -> Self {
        self.config.coordinator.max_request_failures = n;
        self
    }

    pub fn max_failed_jobs(mut self, n: u32) -> Self {
        self.config.run_loop.max_failed_jobs = n;
        self
    }

    pub fn drain_timeout(mut self, d: Duration) -> Self {
        self.config.worker.drain_timeout = d;
        self
    }

    pub fn reader_backoff(mut self, d: Duration) -> Self {
        self.config.worker.reader_backoff = d;
        self
    }

    pub fn liveness_interval(mut self, d: Duration) -> Self {
        self.config.worker.liveness_interval = d;
        self
    }

    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.config.run_loop.heartbeat_interval = d;
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

/// Grace periods in the low hundreds of milliseconds.
pub fn fast_termination() -> TerminationPolicy {
    TerminationPolicy {
        stop_grace: Duration::from_millis(200),
        term_grace: Duration::from_millis(300),
        child_kill_grace: Duration::from_millis(100),
    }
}

/// Builder for job descriptions as the coordinator would send them.
pub struct JobBuilder {
    job: Value,
}

impl JobBuilder {
    pub fn new(job_id: &str, worker_cmd: &str) -> Self {
        Self {
            job: json!({
                "jobId": job_id,
                "AthenaMPCmd": worker_cmd,
                "ATHENA_PROC_NUMBER": 1,
            }),
        }
    }

    fn set(mut self, key: &str, value: Value) -> Self {
        self.job[key] = value;
        self
    }

    pub fn cores(self, n: i64) -> Self {
        self.set("ATHENA_PROC_NUMBER", json!(n))
    }

    pub fn aux_cmd(self, cmd: &str) -> Self {
        self.set("TokenExtractCmd", json!(cmd))
    }

    pub fn pre_setup(self, cmd: &str) -> Self {
        self.set("PreSetup", json!(cmd))
    }

    pub fn post_run(self, cmd: &str) -> Self {
        self.set("PostRun", json!(cmd))
    }

    pub fn yoda_to_os(self) -> Self {
        self.set("yodaToOS", json!(true))
    }

    pub fn to_json(&self) -> Value {
        self.job.clone()
    }

    pub fn build(self) -> JobDescription {
        serde_json::from_value(self.job).expect("JobBuilder produced an invalid job")
    }
}

/// `n` ranges with ids `<prefix>-1 .. <prefix>-n`.
pub fn ranges(prefix: &str, n: usize) -> Vec<EventRange> {
    (1..=n)
        .map(|i| {
            EventRange::new(format!("{}-{}", prefix, i))
                .with_field("LFN", "input.pool.root")
                .with_field("startEvent", i as u64)
                .with_field("lastEvent", i as u64)
        })
        .collect()
}
