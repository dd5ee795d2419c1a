// src/engine/job.rs

use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::{DroidError, Result};

/// Job description as handed out by the coordinator.
///
/// Fields the node does not interpret are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    #[serde(rename = "jobId", deserialize_with = "string_or_number")]
    pub job_id: String,

    /// Shell command of the worker.
    #[serde(rename = "AthenaMPCmd")]
    pub worker_cmd: String,

    /// Shell command of the auxiliary process.
    #[serde(rename = "TokenExtractCmd", default, skip_serializing_if = "Option::is_none")]
    pub aux_cmd: Option<String>,

    /// Concurrent worker slots.
    #[serde(rename = "ATHENA_PROC_NUMBER", default = "default_cores", deserialize_with = "int_or_string")]
    pub cores: i64,

    #[serde(rename = "PreSetup", default, skip_serializing_if = "Option::is_none")]
    pub pre_setup: Option<String>,

    #[serde(rename = "PostRun", default, skip_serializing_if = "Option::is_none")]
    pub post_run: Option<String>,

    /// Failed ranges are also reported through the stager's direct channel.
    #[serde(rename = "yodaToOS", default)]
    pub yoda_to_os: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_cores() -> i64 {
    1
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "jobId must be a string or number, got {}",
            other
        ))),
    }
}

fn int_or_string<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<i64, D::Error> {
    match Value::deserialize(de)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("not an integer: {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|e| serde::de::Error::custom(format!("not an integer '{}': {}", s, e))),
        other => Err(serde::de::Error::custom(format!(
            "expected an integer, got {}",
            other
        ))),
    }
}

impl JobDescription {
    /// Decode a job as handed out by the coordinator. A description that
    /// does not decode is a `SetupError` for that job.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| DroidError::SetupError(format!("malformed job description: {}", e)))
    }

    /// Check the job can be run and return its core count.
    pub fn validate(&self) -> Result<u32> {
        if self.job_id.trim().is_empty() {
            return Err(DroidError::SetupError("job has an empty jobId".to_string()));
        }
        if self.worker_cmd.trim().is_empty() {
            return Err(DroidError::SetupError(format!(
                "job {} has no worker command",
                self.job_id
            )));
        }
        if self.cores < 1 {
            return Err(DroidError::SetupError(format!(
                "ATHENA_PROC_NUMBER = {} must be at least 1",
                self.cores
            )));
        }
        u32::try_from(self.cores).map_err(|_| {
            DroidError::SetupError(format!("ATHENA_PROC_NUMBER = {} is too large", self.cores))
        })
    }
}

/// `jobId` of an undecoded job, or an empty string if it has none.
pub fn raw_job_id(job: &Value) -> String {
    match job.get("jobId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Run a job hook (`PreSetup` / `PostRun`) through `sh -c` in `work_dir`
/// and return its exit code.
pub async fn run_hook(name: &str, cmd_line: &str, work_dir: &Path) -> Result<i32> {
    info!(hook = name, cmd = %cmd_line, "running job hook");

    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd_line)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await?;

    let code = output.status.code().unwrap_or(-1);
    if output.status.success() {
        info!(hook = name, "hook finished");
    } else {
        warn!(
            hook = name,
            exit_code = code,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "hook failed"
        );
    }
    Ok(code)
}
