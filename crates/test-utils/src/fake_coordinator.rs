use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use eventdroid::bridge::BoxFuture;
use eventdroid::coordinator::{Coordinator, Reply, methods};
use eventdroid::errors::Result;
use eventdroid::types::EventRange;
use serde_json::{Map, Value, json};

/// One call as the fake coordinator saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Default)]
struct FakeState {
    jobs: VecDeque<Value>,
    ranges: VecDeque<EventRange>,
    /// Every `getEventRanges` fails with a non-zero status while this is > 0.
    failing_range_requests: u32,
    calls: Vec<RecordedCall>,
}

/// Scripted, in-process coordinator.
///
/// Clones share state, so a test keeps one handle for inspection while the
/// execution loop owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeCoordinator {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(self, job: Value) -> Self {
        self.lock().jobs.push_back(job);
        self
    }

    pub fn with_ranges(self, ranges: Vec<EventRange>) -> Self {
        self.lock().ranges.extend(ranges);
        self
    }

    pub fn failing_range_requests(self, n: u32) -> Self {
        self.lock().failing_range_requests = n;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake coordinator state poisoned")
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn methods(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.method.clone()).collect()
    }

    /// Every output entry reported through either update method, in order.
    pub fn reported(&self) -> Vec<Value> {
        let mut out = Vec::new();
        for call in self.lock().calls.iter() {
            match call.method.as_str() {
                methods::UPDATE_EVENT_RANGE => out.push(call.params.clone()),
                methods::UPDATE_EVENT_RANGES => {
                    if let Value::Array(entries) = &call.params {
                        out.extend(entries.iter().cloned());
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Ids of reported entries with the given status.
    pub fn reported_ids(&self, status: &str) -> Vec<String> {
        self.reported()
            .iter()
            .filter(|e| e.get("eventStatus").and_then(Value::as_str) == Some(status))
            .filter_map(|e| e.get("eventRangeID").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn remaining_ranges(&self) -> usize {
        self.lock().ranges.len()
    }

    fn answer(&self, method: &str, params: Value) -> Reply {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            method: method.to_string(),
            params: params.clone(),
        });

        let mut payload = Map::new();
        match method {
            methods::GET_JOB => {
                let job = state.jobs.pop_front().unwrap_or(Value::Null);
                payload.insert("job".to_string(), job);
            }
            methods::GET_EVENT_RANGES => {
                if state.failing_range_requests > 0 {
                    state.failing_range_requests -= 1;
                    return Reply {
                        id: None,
                        status_code: 500,
                        payload,
                    };
                }
                let wanted = params.get("nRanges").and_then(Value::as_u64).unwrap_or(1);
                let take = (wanted as usize).min(state.ranges.len());
                let batch: Vec<EventRange> = state.ranges.drain(..take).collect();
                payload.insert("eventRanges".to_string(), json!(batch));
            }
            _ => {}
        }
        Reply::ok(payload)
    }
}

impl Coordinator for FakeCoordinator {
    fn call<'a>(&'a mut self, method: &'a str, params: Value) -> BoxFuture<'a, Result<Reply>> {
        let reply = self.answer(method, params);
        Box::pin(async move { Ok(reply) })
    }
}
