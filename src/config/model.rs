// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration file as read from TOML, before validation.
///
/// ```toml
/// [node]
/// id = 3
/// work_dir = "/scratch/run42"
///
/// [coordinator]
/// exchange_dir = "/shared/run42/exchange/node_3"
/// poll_interval = "1s"
///
/// [worker]
/// drain_timeout = "30m"
///
/// [loop]
/// heartbeat_interval = "60s"
/// ```
///
/// Everything except `[node].id` and `[coordinator].exchange_dir` has a
/// default.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNodeConfig {
    pub node: NodeSection,

    pub coordinator: CoordinatorSection,

    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default, rename = "loop")]
    pub run_loop: LoopSection,
}

/// `[node]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    pub id: u32,

    /// Parent of the per-node working directory `node_<id>`.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

/// `[coordinator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    /// Directory shared with the coordinator for the file handshake.
    pub exchange_dir: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Consecutive failed range requests before the job is wound down.
    #[serde(default = "default_max_request_failures")]
    pub max_request_failures: u32,
}

/// `[worker]` section: socket and termination timings.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    #[serde(default = "default_socket_name")]
    pub socket_name: String,

    #[serde(default = "default_reader_backoff")]
    pub reader_backoff: String,

    #[serde(default = "default_liveness_interval")]
    pub liveness_interval: String,

    #[serde(default = "default_stop_grace")]
    pub stop_grace: String,

    #[serde(default = "default_term_grace")]
    pub term_grace: String,

    #[serde(default = "default_child_kill_grace")]
    pub child_kill_grace: String,

    /// How long the worker may keep running after "no more work" was sent.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            socket_name: default_socket_name(),
            reader_backoff: default_reader_backoff(),
            liveness_interval: default_liveness_interval(),
            stop_grace: default_stop_grace(),
            term_grace: default_term_grace(),
            child_kill_grace: default_child_kill_grace(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// `[loop]` section: pacing of the execution loop.
#[derive(Debug, Clone, Deserialize)]
pub struct LoopSection {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: String,

    #[serde(default = "default_idle_sleep")]
    pub idle_sleep: String,

    #[serde(default = "default_cpu_sample_interval")]
    pub cpu_sample_interval: String,

    /// Failed jobs (setup failure or non-zero worker exit) before the node
    /// stops asking for more.
    #[serde(default = "default_max_failed_jobs")]
    pub max_failed_jobs: u32,
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            idle_sleep: default_idle_sleep(),
            cpu_sample_interval: default_cpu_sample_interval(),
            max_failed_jobs: default_max_failed_jobs(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_max_request_failures() -> u32 {
    30
}

fn default_socket_name() -> String {
    "EventService_EventRanges".to_string()
}

fn default_reader_backoff() -> String {
    "1s".to_string()
}

fn default_liveness_interval() -> String {
    "100ms".to_string()
}

fn default_stop_grace() -> String {
    "2s".to_string()
}

fn default_term_grace() -> String {
    "5s".to_string()
}

fn default_child_kill_grace() -> String {
    "1s".to_string()
}

fn default_drain_timeout() -> String {
    "30m".to_string()
}

fn default_heartbeat_interval() -> String {
    "60s".to_string()
}

fn default_idle_sleep() -> String {
    "1ms".to_string()
}

fn default_cpu_sample_interval() -> String {
    "60s".to_string()
}

fn default_max_failed_jobs() -> u32 {
    2
}

/// Validated node configuration.
///
/// Built once at startup and handed to the execution loop; nothing reads
/// configuration from global state.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u32,
    pub work_dir: PathBuf,
    pub coordinator: CoordinatorSettings,
    pub worker: WorkerSettings,
    pub run_loop: LoopSettings,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub exchange_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_request_failures: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub socket_name: String,
    pub reader_backoff: Duration,
    pub liveness_interval: Duration,
    pub termination: TerminationPolicy,
    pub drain_timeout: Duration,
}

/// Grace periods of the termination cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    /// Wait after pushing the stop sentinel, before SIGTERM.
    pub stop_grace: Duration,
    /// Wait after SIGTERM, before the recursive SIGKILL.
    pub term_grace: Duration,
    /// Wait inside the bridge task between SIGTERM and SIGKILL of the worker.
    pub child_kill_grace: Duration,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(2),
            term_grace: Duration::from_secs(5),
            child_kill_grace: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub heartbeat_interval: Duration,
    pub idle_sleep: Duration,
    pub cpu_sample_interval: Duration,
    pub max_failed_jobs: u32,
}

impl NodeConfig {
    /// Per-node working directory (`<work_dir>/node_<id>`).
    pub fn node_dir(&self) -> PathBuf {
        self.work_dir.join(format!("node_{}", self.node_id))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.node_dir().join(&self.worker.socket_name)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.node_dir()
            .join(format!("jobMetrics-node_{}.json", self.node_id))
    }
}
