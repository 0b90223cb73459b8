//! Bounded in-memory log of received responses

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::protocol::{is_completion, InboundFrame};

/// A stored response frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRecord {
    /// Sequence id, increasing in receipt order
    pub id: u64,

    /// When the frame was received
    pub timestamp: DateTime<Utc>,

    /// `msg_type` of the frame
    pub msg_type: String,

    /// Parsed frame body
    pub data: Value,
}

impl ResponseRecord {
    /// Whether this frame ends a task
    pub fn is_completion(&self) -> bool {
        is_completion(&self.msg_type)
    }
}

struct LogInner {
    records: VecDeque<ResponseRecord>,
    next_id: u64,
}

/// Ordered, bounded response log
pub struct ResponseLog {
    inner: Mutex<LogInner>,
    capacity: usize,
}

impl ResponseLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(LogInner {
                records: VecDeque::with_capacity(capacity),
                next_id: 0,
            }),
            capacity,
        }
    }

    /// Append a frame and hand the stored record to `publish` while the
    /// log is still locked, so subscribers observe log order.
    pub fn append_with<F>(&self, frame: InboundFrame, publish: F) -> ResponseRecord
    where
        F: FnOnce(&ResponseRecord),
    {
        let mut inner = self.inner.lock();
        let record = ResponseRecord {
            id: inner.next_id,
            timestamp: Utc::now(),
            msg_type: frame.msg_type,
            data: frame.body,
        };
        inner.next_id += 1;

        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record.clone());
        publish(&record);
        record
    }

    /// Newest `limit` records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ResponseRecord> {
        let inner = self.inner.lock();
        let skip = inner.records.len().saturating_sub(limit);
        inner.records.iter().skip(skip).cloned().collect()
    }

    /// Number of records currently retained
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
