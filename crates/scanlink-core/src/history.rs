use alloc::collections::VecDeque;
use alloc::string::String;

use serde::Serialize;

use crate::config::HISTORY_CAPACITY;
use crate::scan_router::ScanMode;

/// One non-provisioning scan as seen by the device.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanRecord {
    pub payload: String,
    /// Device uptime when the line arrived.
    pub timestamp_ms: u64,
    pub device_id: String,
    /// Mode in force when the line arrived. Never rewritten afterwards.
    pub mode: ScanMode,
    /// Accepted by the web application mirror.
    pub delivered_locally: bool,
    /// Accepted by the realtime database.
    pub delivered_remotely: bool,
}

/// Bounded in-memory scan history, oldest first.
///
/// Memory: 20 records of a few hundred bytes each, heap allocated.
pub struct ScanHistory {
    entries: VecDeque<ScanRecord>,
    capacity: usize,
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl ScanHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, dropping the oldest one when full. Returns the index
    /// of the new record.
    pub fn push(&mut self, record: ScanRecord) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
        self.entries.len() - 1
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ScanRecord> {
        self.entries.get_mut(index)
    }

    pub fn latest(&self) -> Option<&ScanRecord> {
        self.entries.back()
    }

    pub fn entries(&self) -> &VecDeque<ScanRecord> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
