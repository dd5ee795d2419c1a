// src/coordinator/client.rs

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::bridge::BoxFuture;
use crate::coordinator::channel::{ChannelTransport, Reply, RequestResponseChannel};
use crate::errors::{DroidError, Result};
use crate::types::{EventRange, OutputEntry};

/// Method names of the coordinator protocol.
pub mod methods {
    pub const GET_JOB: &str = "getJob";
    pub const GET_EVENT_RANGES: &str = "getEventRanges";
    pub const UPDATE_EVENT_RANGE: &str = "updateEventRange";
    pub const UPDATE_EVENT_RANGES: &str = "updateEventRanges";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const FINISH_JOB: &str = "finishJob";
    pub const FINISH_NODE: &str = "finishNode";
}

/// Anything that can answer a coordinator call.
///
/// Production code uses [`RequestResponseChannel`]; tests provide a scripted
/// fake.
pub trait Coordinator: Send {
    fn call<'a>(&'a mut self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Reply>>;
}

impl<T: ChannelTransport> Coordinator for RequestResponseChannel<T> {
    fn call<'a>(&'a mut self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Reply>> {
        Box::pin(RequestResponseChannel::call(self, method, params))
    }
}

/// Final state of a job as reported to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        }
    }
}

/// Typed wrapper around the coordinator protocol for one node.
#[derive(Debug)]
pub struct CoordinatorClient<C> {
    inner: C,
    node_id: u32,
}

impl<C: Coordinator> CoordinatorClient<C> {
    pub fn new(inner: C, node_id: u32) -> Self {
        Self { inner, node_id }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    async fn checked(&mut self, method: &str, params: Value) -> Result<Reply> {
        let reply = self.inner.call(method, params).await?;
        if !reply.is_success() {
            return Err(DroidError::RequestFailure(format!(
                "{} returned status {}",
                method, reply.status_code
            )));
        }
        debug!(method, "coordinator call succeeded");
        Ok(reply)
    }

    /// `Ok(None)` when the coordinator has no job for this node.
    ///
    /// The job comes back undecoded so that a malformed description can
    /// still be reported as a failed job.
    pub async fn get_job(&mut self) -> Result<Option<Value>> {
        let reply = self
            .checked(methods::GET_JOB, json!({ "node": self.node_id }))
            .await?;

        match reply.get("job") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) if map.is_empty() => Ok(None),
            Some(job) => Ok(Some(job.clone())),
        }
    }

    pub async fn get_event_ranges(&mut self, job_id: &str, count: u64) -> Result<Vec<EventRange>> {
        let reply = self
            .checked(
                methods::GET_EVENT_RANGES,
                json!({ "jobId": job_id, "nRanges": count, "node": self.node_id }),
            )
            .await?;

        match reply.get("eventRanges") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(ranges) => Ok(serde_json::from_value(ranges.clone())?),
        }
    }

    pub async fn update_event_range(&mut self, entry: &OutputEntry) -> Result<()> {
        self.checked(methods::UPDATE_EVENT_RANGE, serde_json::to_value(entry)?)
            .await
            .map(|_| ())
    }

    pub async fn update_event_ranges(&mut self, entries: &[OutputEntry]) -> Result<()> {
        self.checked(methods::UPDATE_EVENT_RANGES, serde_json::to_value(entries)?)
            .await
            .map(|_| ())
    }

    pub async fn heartbeat<M: Serialize>(&mut self, metrics: &M) -> Result<()> {
        self.checked(methods::HEARTBEAT, serde_json::to_value(metrics)?)
            .await
            .map(|_| ())
    }

    pub async fn finish_job(&mut self, job_id: &str, state: JobState) -> Result<()> {
        self.checked(
            methods::FINISH_JOB,
            json!({ "jobId": job_id, "node": self.node_id, "state": state.as_str() }),
        )
        .await
        .map(|_| ())
    }

    pub async fn finish_node(&mut self) -> Result<()> {
        self.checked(
            methods::FINISH_NODE,
            json!({ "node": self.node_id, "state": "finished" }),
        )
        .await
        .map(|_| ())
    }
}
