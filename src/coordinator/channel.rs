// src/coordinator/channel.rs

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::{DroidError, Result};

/// Byte-level transport to the coordinator.
pub trait ChannelTransport: Send {
    /// Hand one serialized request to the coordinator.
    fn post(&mut self, request: &[u8]) -> io::Result<()>;

    /// Fetch one reply if available, without blocking.
    fn try_fetch(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Request as written to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// Decoded coordinator reply. A non-zero `status_code` is a soft failure
/// for the caller to interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Id of the request this answers; replies without one match any request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(rename = "StatusCode")]
    pub status_code: i64,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Reply {
    pub fn ok(payload: Map<String, Value>) -> Self {
        Self {
            id: None,
            status_code: 0,
            payload,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

/// One outstanding request at a time: `send` then poll with `receive`.
#[derive(Debug)]
pub struct RequestResponseChannel<T> {
    transport: T,
    next_id: u64,
    pending: Option<u64>,
    poll_interval: Duration,
}

impl<T: ChannelTransport> RequestResponseChannel<T> {
    pub fn new(transport: T, poll_interval: Duration) -> Self {
        Self {
            transport,
            next_id: 1,
            pending: None,
            poll_interval,
        }
    }

    /// Serialize and post a request. Any reply still owed for an earlier
    /// request is abandoned.
    pub fn send(&mut self, method: &str, params: Value) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;

        let envelope = Envelope {
            id,
            method: method.to_string(),
            params,
        };
        let bytes = serde_json::to_vec(&envelope)?;
        self.transport
            .post(&bytes)
            .map_err(|e| DroidError::RequestFailure(format!("posting {}: {}", method, e)))?;

        debug!(id, method, "request sent to coordinator");
        self.pending = Some(id);
        Ok(id)
    }

    /// Non-blocking check for the reply to the pending request. Replies to
    /// older requests are discarded.
    pub fn try_receive(&mut self) -> Result<Option<Reply>> {
        let Some(pending) = self.pending else {
            return Ok(None);
        };

        while let Some(bytes) = self
            .transport
            .try_fetch()
            .map_err(|e| DroidError::RequestFailure(format!("reading reply: {}", e)))?
        {
            let reply: Reply = serde_json::from_slice(&bytes)?;
            match reply.id {
                Some(id) if id != pending => {
                    warn!(id, pending, "discarding stale coordinator reply");
                }
                _ => {
                    self.pending = None;
                    return Ok(Some(reply));
                }
            }
        }

        Ok(None)
    }

    /// Poll until the pending request is answered. There is no timeout; the
    /// caller bounds the wait.
    pub async fn receive(&mut self) -> Result<Reply> {
        if self.pending.is_none() {
            return Err(DroidError::RequestFailure(
                "receive called with no pending request".to_string(),
            ));
        }
        loop {
            if let Some(reply) = self.try_receive()? {
                return Ok(reply);
            }
            sleep(self.poll_interval).await;
        }
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Reply> {
        self.send(method, params)?;
        self.receive().await
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
