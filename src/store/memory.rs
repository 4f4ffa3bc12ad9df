//! In-process store for tests and ephemeral runs

use super::{newest_first, RecordStore};
use anyhow::{anyhow, Result};
use smartdesk_shared::{EventRecord, LcdMessageRecord, SittingSessionRecord, TelemetrySample};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    telemetry: Vec<TelemetrySample>,
    events: Vec<EventRecord>,
    sessions: Vec<SittingSessionRecord>,
    lcd_messages: Vec<LcdMessageRecord>,
}

/// Record store that keeps every table in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl RecordStore for MemoryStore {
    fn append_telemetry(&self, sample: &TelemetrySample) -> Result<()> {
        self.tables()?.telemetry.push(sample.clone());
        Ok(())
    }

    fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.tables()?.events.push(event.clone());
        Ok(())
    }

    fn append_session(&self, session: &SittingSessionRecord) -> Result<()> {
        self.tables()?.sessions.push(session.clone());
        Ok(())
    }

    fn append_lcd_message(&self, message: &LcdMessageRecord) -> Result<()> {
        self.tables()?.lcd_messages.push(message.clone());
        Ok(())
    }

    fn latest_telemetry(&self) -> Result<Option<TelemetrySample>> {
        Ok(self.telemetry_since(0, 1)?.pop())
    }

    fn telemetry_since(&self, since: u64, limit: usize) -> Result<Vec<TelemetrySample>> {
        let tables = self.tables()?;
        let rows = tables.telemetry.iter().filter(|s| s.ts >= since).cloned();
        Ok(newest_first(rows, |s| s.ts, limit))
    }

    fn recent_events(&self, event_type: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        let tables = self.tables()?;
        let rows = tables
            .events
            .iter()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned();
        Ok(newest_first(rows, |e| e.ts, limit))
    }

    fn latest_event_of(&self, types: &[&str]) -> Result<Option<EventRecord>> {
        let tables = self.tables()?;
        let rows = tables
            .events
            .iter()
            .filter(|e| types.contains(&e.event_type.as_str()))
            .cloned();
        Ok(newest_first(rows, |e| e.ts, 1).pop())
    }

    fn sessions(&self, limit: usize) -> Result<Vec<SittingSessionRecord>> {
        let tables = self.tables()?;
        Ok(newest_first(tables.sessions.iter().cloned(), |s| s.ended_at, limit))
    }

    fn lcd_messages(&self, limit: usize) -> Result<Vec<LcdMessageRecord>> {
        let tables = self.tables()?;
        Ok(newest_first(tables.lcd_messages.iter().cloned(), |m| m.ts, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        crate::store::tests::exercise_store(&MemoryStore::new());
    }
}
