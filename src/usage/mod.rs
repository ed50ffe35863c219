//! Per-session usage ledger.
//!
//! Counts tool invocations per (session, operation) pair for the lifetime of
//! the process. Counts only ever grow and records are never evicted.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    pub count: u64,
    pub last_invoked_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct UsageLedger {
    records: Mutex<HashMap<(String, String), UsageRecord>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one invocation of `operation` by `session_id`.
    pub fn record(&self, session_id: &str, operation: &str) {
        let now = Utc::now();
        let mut records = self.records.lock();
        records
            .entry((session_id.to_string(), operation.to_string()))
            .and_modify(|record| {
                record.count += 1;
                record.last_invoked_at = now;
            })
            .or_insert(UsageRecord {
                count: 1,
                last_invoked_at: now,
            });
    }

    /// Invocation counts of a session, keyed by operation name.
    pub fn summarize(&self, session_id: &str) -> BTreeMap<String, u64> {
        self.records
            .lock()
            .iter()
            .filter(|((session, _), _)| session == session_id)
            .map(|((_, operation), record)| (operation.clone(), record.count))
            .collect()
    }

    pub fn record_of(&self, session_id: &str, operation: &str) -> Option<UsageRecord> {
        self.records
            .lock()
            .get(&(session_id.to_string(), operation.to_string()))
            .cloned()
    }

    /// Sum of all counts across every session.
    pub fn total_invocations(&self) -> u64 {
        self.records.lock().values().map(|record| record.count).sum()
    }
}
