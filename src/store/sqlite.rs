//! SQLite store: one table per record kind, append-only

use super::RecordStore;
use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use smartdesk_shared::{EventRecord, LcdMessageRecord, SittingSessionRecord, TelemetrySample};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database file created inside the data directory
pub const DATABASE_FILE: &str = "smartdesk.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS telemetry (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts INTEGER NOT NULL,
  pir INTEGER NOT NULL,
  ldr INTEGER NOT NULL,
  relay INTEGER NOT NULL,
  auto INTEGER NOT NULL,
  wifi INTEGER NOT NULL,
  rssi INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_telemetry_ts ON telemetry (ts);

CREATE TABLE IF NOT EXISTS events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts INTEGER NOT NULL,
  type TEXT NOT NULL,
  detail TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_ts ON events (ts);
CREATE INDEX IF NOT EXISTS idx_events_type_ts ON events (type, ts);

CREATE TABLE IF NOT EXISTS lcd_messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts INTEGER NOT NULL,
  line2 TEXT NOT NULL,
  line3 TEXT NOT NULL,
  source TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sitting_sessions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  ts_start INTEGER NOT NULL,
  ts_end INTEGER NOT NULL,
  duration_ms INTEGER NOT NULL,
  session_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sitting_sessions_ts_end ON sitting_sessions (ts_end);
";

const TELEMETRY_COLUMNS: &str = "ts, pir, ldr, relay, auto, wifi, rssi";

/// Record store persisted in a SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) `smartdesk.db` inside `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        let path = dir.join(DATABASE_FILE);
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("Failed to create schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

fn to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn column_u64(row: &Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let value: i64 = row.get(index)?;
    u64::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(index, value))
}

fn telemetry_row(row: &Row<'_>) -> rusqlite::Result<TelemetrySample> {
    Ok(TelemetrySample {
        ts: column_u64(row, 0)?,
        motion: row.get(1)?,
        light_level: row.get(2)?,
        relay_on: row.get(3)?,
        auto_mode: row.get(4)?,
        wifi_ok: row.get(5)?,
        rssi: row.get(6)?,
    })
}

fn event_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        ts: column_u64(row, 0)?,
        event_type: row.get(1)?,
        detail: row.get(2)?,
    })
}

impl RecordStore for SqliteStore {
    fn append_telemetry(&self, sample: &TelemetrySample) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO telemetry (ts, pir, ldr, relay, auto, wifi, rssi) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    to_sql(sample.ts),
                    sample.motion,
                    sample.light_level,
                    sample.relay_on,
                    sample.auto_mode,
                    sample.wifi_ok,
                    sample.rssi
                ],
            )
            .context("Failed to insert telemetry")?;
        Ok(())
    }

    fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO events (ts, type, detail) VALUES (?1, ?2, ?3)",
                params![to_sql(event.ts), event.event_type, event.detail],
            )
            .context("Failed to insert event")?;
        Ok(())
    }

    fn append_session(&self, session: &SittingSessionRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO sitting_sessions (ts_start, ts_end, duration_ms, session_id) VALUES (?1, ?2, ?3, ?4)",
                params![
                    to_sql(session.started_at),
                    to_sql(session.ended_at),
                    to_sql(session.duration_ms),
                    to_sql(session.session_id)
                ],
            )
            .context("Failed to insert sitting session")?;
        Ok(())
    }

    fn append_lcd_message(&self, message: &LcdMessageRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO lcd_messages (ts, line2, line3, source) VALUES (?1, ?2, ?3, ?4)",
                params![to_sql(message.ts), message.line2, message.line3, message.source],
            )
            .context("Failed to insert lcd message")?;
        Ok(())
    }

    fn latest_telemetry(&self) -> Result<Option<TelemetrySample>> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                &format!("SELECT {TELEMETRY_COLUMNS} FROM telemetry ORDER BY ts DESC, id DESC LIMIT 1"),
                [],
                telemetry_row,
            )
            .optional()?;
        Ok(sample)
    }

    fn telemetry_since(&self, since: u64, limit: usize) -> Result<Vec<TelemetrySample>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TELEMETRY_COLUMNS} FROM telemetry WHERE ts >= ?1 ORDER BY ts DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![to_sql(since), sql_limit(limit)], telemetry_row)?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn recent_events(&self, event_type: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        let conn = self.conn()?;
        let rows = match event_type {
            Some(event_type) => {
                let mut stmt = conn.prepare(
                    "SELECT ts, type, detail FROM events WHERE type = ?1 ORDER BY ts DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![event_type, sql_limit(limit)], event_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT ts, type, detail FROM events ORDER BY ts DESC, id DESC LIMIT ?1")?;
                let rows = stmt.query_map(params![sql_limit(limit)], event_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    fn latest_event_of(&self, types: &[&str]) -> Result<Option<EventRecord>> {
        if types.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; types.len()].join(", ");
        let sql = format!(
            "SELECT ts, type, detail FROM events WHERE type IN ({placeholders}) ORDER BY ts DESC, id DESC LIMIT 1"
        );
        let values: Vec<Value> = types.iter().map(|t| Value::Text((*t).to_string())).collect();

        let conn = self.conn()?;
        let event = conn
            .query_row(&sql, params_from_iter(values.iter()), event_row)
            .optional()?;
        Ok(event)
    }

    fn sessions(&self, limit: usize) -> Result<Vec<SittingSessionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ts_start, ts_end, duration_ms, session_id FROM sitting_sessions \
             ORDER BY ts_end DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![sql_limit(limit)], |row| {
            Ok(SittingSessionRecord {
                started_at: column_u64(row, 0)?,
                ended_at: column_u64(row, 1)?,
                duration_ms: column_u64(row, 2)?,
                session_id: column_u64(row, 3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    fn lcd_messages(&self, limit: usize) -> Result<Vec<LcdMessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ts, line2, line3, source FROM lcd_messages ORDER BY ts DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![sql_limit(limit)], |row| {
            Ok(LcdMessageRecord {
                ts: column_u64(row, 0)?,
                line2: row.get(1)?,
                line3: row.get(2)?,
                source: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
