//! Camera frame records and the bounded frame history.

use crate::limits::FRAME_HISTORY_CAPACITY;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A captured frame as stored by the frame store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
    /// Base64-encoded JPEG.
    pub image: String,
}

/// Bounded FIFO of the most recent captured frames.
///
/// Inserting into a full history evicts the oldest record. Order is insertion
/// order, oldest first.
#[derive(Debug, Clone)]
pub struct FrameHistory {
    records: VecDeque<FrameRecord>,
    capacity: usize,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new(FRAME_HISTORY_CAPACITY)
    }
}

impl FrameHistory {
    /// Create a history holding at most `capacity` records (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, returning the evicted one if the history was full.
    pub fn push(&mut self, record: FrameRecord) -> Option<FrameRecord> {
        self.records.push_back(record);
        if self.records.len() > self.capacity {
            self.records.pop_front()
        } else {
            None
        }
    }

    /// Replace the contents with the tail of `records`.
    pub fn seed(&mut self, records: impl IntoIterator<Item = FrameRecord>) {
        self.records.clear();
        for record in records {
            self.push(record);
        }
    }

    /// Newest record, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&FrameRecord> {
        self.records.back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records.iter()
    }

    /// Snapshot of the records, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<FrameRecord> {
        self.records.iter().cloned().collect()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the history holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Latest frame taken off the live camera stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFrame {
    /// Local receive time.
    pub received_at: DateTime<Utc>,
    /// Monotonic counter per stream, starting at 1.
    pub sequence: u64,
    /// Raw JPEG payload.
    pub jpeg: Bytes,
    /// Base64 encoding of `jpeg`.
    pub base64: String,
}
