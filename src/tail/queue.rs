use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One log/trace record emitted by a worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailEvent {
    pub worker: String,
    /// Unix epoch milliseconds.
    pub emitted_at: i64,
    pub payload: Value,
}

impl TailEvent {
    pub fn new(worker: impl Into<String>, payload: Value) -> Self {
        Self {
            worker: worker.into(),
            emitted_at: chrono::Utc::now().timestamp_millis(),
            payload,
        }
    }
}

/// Per-worker FIFO queues of tail events, drained destructively.
#[derive(Debug, Default)]
pub struct TailFanout {
    queues: Mutex<HashMap<String, VecDeque<TailEvent>>>,
}

impl TailFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, worker: &str, payload: Value) {
        self.publish_all(worker, std::iter::once(payload));
    }

    /// Append every payload of one triggering call under a single lock, so
    /// no other call's events interleave with them.
    pub fn publish_all(&self, worker: &str, payloads: impl IntoIterator<Item = Value>) {
        let mut queues = self.lock();
        let queue = queues.entry(worker.to_string()).or_default();
        for payload in payloads {
            queue.push_back(TailEvent::new(worker, payload));
        }
    }

    /// Remove and return everything queued for `worker`, oldest first.
    pub fn drain(&self, worker: &str) -> Vec<TailEvent> {
        self.lock()
            .remove(worker)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn pending(&self, worker: &str) -> usize {
        self.lock().get(worker).map_or(0, VecDeque::len)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<TailEvent>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
