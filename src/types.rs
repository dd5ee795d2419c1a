// src/types.rs

//! Shared value types: event ranges, their lifecycle records, work batches
//! and the completed-output entries drained by the execution loop.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Literal sentinel sent to the worker when no further ranges will come.
pub const NO_MORE_EVENTS: &str = "No more events";

/// Marker text the worker emits whenever it can accept another range.
pub const READY_FOR_EVENTS: &str = "Ready for events";

/// Status recorded for a range whose result path message was parsed.
pub const STATUS_FINISHED: &str = "finished";

/// One unit of input data, as handed out by the coordinator.
///
/// Only `eventRangeID` is interpreted; every other field is carried through
/// untouched to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRange {
    #[serde(rename = "eventRangeID")]
    pub id: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EventRange {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }
}

/// Lifecycle of a single event range inside the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventRangeStatus {
    New,
    Processing,
    Finished,
    Failed,
}

impl EventRangeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventRangeStatus::Finished | EventRangeStatus::Failed)
    }
}

impl fmt::Display for EventRangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventRangeStatus::New => "new",
            EventRangeStatus::Processing => "processing",
            EventRangeStatus::Finished => "finished",
            EventRangeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRangeRecord {
    pub id: String,
    pub status: EventRangeStatus,
    /// Result path message or diagnostic, once terminal.
    pub output: Option<String>,
    pub error_acronym: Option<String>,
}

impl EventRangeRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: EventRangeStatus::New,
            output: None,
            error_acronym: None,
        }
    }
}

/// One entry of the pending-batch FIFO.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkBatch {
    Ranges(Vec<EventRange>),
    NoMoreWork,
}

impl WorkBatch {
    pub fn is_sentinel(&self) -> bool {
        matches!(self, WorkBatch::NoMoreWork)
    }

    pub fn ids(&self) -> Vec<&str> {
        match self {
            WorkBatch::Ranges(ranges) => ranges.iter().map(|r| r.id.as_str()).collect(),
            WorkBatch::NoMoreWork => Vec::new(),
        }
    }

    /// Encode for the worker socket: a JSON array, or the literal sentinel.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        match self {
            WorkBatch::Ranges(ranges) => serde_json::to_string(ranges),
            WorkBatch::NoMoreWork => Ok(NO_MORE_EVENTS.to_string()),
        }
    }
}

/// A completed or failed range waiting to be reported upstream.
///
/// `status` is either [`STATUS_FINISHED`] or the worker's error acronym.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    #[serde(rename = "eventRangeID")]
    pub event_range_id: String,
    #[serde(rename = "eventStatus")]
    pub status: String,
    pub output: String,
}

impl OutputEntry {
    pub fn new(
        event_range_id: impl Into<String>,
        status: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            event_range_id: event_range_id.into(),
            status: status.into(),
            output: output.into(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == STATUS_FINISHED
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with("ERR")
    }
}
