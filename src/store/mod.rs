//! Persistence collaborator
//!
//! Rows are append-only. Queries return newest first; rows sharing a
//! timestamp come back in reverse append order.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use smartdesk_shared::{EventRecord, LcdMessageRecord, Record, SittingSessionRecord, TelemetrySample};

/// Tables the hub writes to
pub trait RecordStore: Send + Sync {
    fn append_telemetry(&self, sample: &TelemetrySample) -> Result<()>;
    fn append_event(&self, event: &EventRecord) -> Result<()>;
    fn append_session(&self, session: &SittingSessionRecord) -> Result<()>;
    fn append_lcd_message(&self, message: &LcdMessageRecord) -> Result<()>;

    fn latest_telemetry(&self) -> Result<Option<TelemetrySample>>;
    /// Samples with `ts >= since`
    fn telemetry_since(&self, since: u64, limit: usize) -> Result<Vec<TelemetrySample>>;
    /// Events, optionally only those of one type
    fn recent_events(&self, event_type: Option<&str>, limit: usize) -> Result<Vec<EventRecord>>;
    /// Most recent event whose type is one of `types`
    fn latest_event_of(&self, types: &[&str]) -> Result<Option<EventRecord>>;
    /// Sessions ordered by end time
    fn sessions(&self, limit: usize) -> Result<Vec<SittingSessionRecord>>;
    fn lcd_messages(&self, limit: usize) -> Result<Vec<LcdMessageRecord>>;

    /// Append one row produced by the device state
    fn append(&self, record: &Record) -> Result<()> {
        match record {
            Record::Telemetry(sample) => self.append_telemetry(sample),
            Record::Event(event) => self.append_event(event),
            Record::Session(session) => self.append_session(session),
        }
    }
}

/// Newest first by `key`, ties broken by later position, cut to `limit`
pub(crate) fn newest_first<T>(rows: impl Iterator<Item = T>, key: impl Fn(&T) -> u64, limit: usize) -> Vec<T> {
    let mut rows: Vec<T> = rows.collect();
    rows.reverse();
    // Stable sort keeps the reversed append order among equal keys
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows.truncate(limit);
    rows
}
