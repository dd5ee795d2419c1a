// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    CoordinatorSettings, LoopSettings, NodeConfig, RawNodeConfig, TerminationPolicy,
    WorkerSettings,
};
use crate::errors::{DroidError, Result};

impl TryFrom<RawNodeConfig> for NodeConfig {
    type Error = DroidError;

    fn try_from(raw: RawNodeConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let coordinator = CoordinatorSettings {
            exchange_dir: raw.coordinator.exchange_dir,
            poll_interval: duration_field("coordinator.poll_interval", &raw.coordinator.poll_interval)?,
            max_request_failures: raw.coordinator.max_request_failures,
        };

        let w = &raw.worker;
        let worker = WorkerSettings {
            socket_name: w.socket_name.clone(),
            reader_backoff: duration_field("worker.reader_backoff", &w.reader_backoff)?,
            liveness_interval: duration_field("worker.liveness_interval", &w.liveness_interval)?,
            termination: TerminationPolicy {
                stop_grace: duration_field("worker.stop_grace", &w.stop_grace)?,
                term_grace: duration_field("worker.term_grace", &w.term_grace)?,
                child_kill_grace: duration_field("worker.child_kill_grace", &w.child_kill_grace)?,
            },
            drain_timeout: duration_field("worker.drain_timeout", &w.drain_timeout)?,
        };

        let l = &raw.run_loop;
        let run_loop = LoopSettings {
            heartbeat_interval: duration_field("loop.heartbeat_interval", &l.heartbeat_interval)?,
            idle_sleep: duration_field("loop.idle_sleep", &l.idle_sleep)?,
            cpu_sample_interval: duration_field("loop.cpu_sample_interval", &l.cpu_sample_interval)?,
            max_failed_jobs: l.max_failed_jobs,
        };

        Ok(NodeConfig {
            node_id: raw.node.id,
            work_dir: raw.node.work_dir,
            coordinator,
            worker,
            run_loop,
        })
    }
}

fn validate_raw_config(cfg: &RawNodeConfig) -> Result<()> {
    validate_worker_section(cfg)?;
    validate_loop_section(cfg)?;
    Ok(())
}

fn validate_worker_section(cfg: &RawNodeConfig) -> Result<()> {
    let name = cfg.worker.socket_name.trim();
    if name.is_empty() {
        return Err(DroidError::ConfigError(
            "[worker].socket_name must not be empty".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(DroidError::ConfigError(format!(
            "[worker].socket_name must be a bare file name (got '{}')",
            name
        )));
    }
    Ok(())
}

fn validate_loop_section(cfg: &RawNodeConfig) -> Result<()> {
    if cfg.run_loop.max_failed_jobs == 0 {
        return Err(DroidError::ConfigError(
            "[loop].max_failed_jobs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.coordinator.max_request_failures == 0 {
        return Err(DroidError::ConfigError(
            "[coordinator].max_request_failures must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn duration_field(key: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| DroidError::ConfigError(format!("[{}] {}", key, e)))
}
