//! Persisted record shapes
//!
//! Rows handed to the store collaborator. Field names follow the device wire
//! names so stored rows stay readable next to raw MQTT captures.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Event type written for every accepted explicit relay acknowledgement
pub const EVENT_RELAY_ACK: &str = "RELAY_ACK";
/// Event type written when the telemetry relay value flips
pub const EVENT_RELAY_CHANGE: &str = "RELAY_CHANGE";
/// Event type written for every command published to the device
pub const EVENT_CMD_SENT: &str = "CMD_SENT";
/// Event type written when a standby message is set
pub const EVENT_LCD_STANDBY_SET: &str = "LCD_STANDBY_SET";
/// Device lifecycle event: a person sat down
pub const EVENT_SESSION_START: &str = "session_start";
/// Device lifecycle event: a person left
pub const EVENT_SESSION_END: &str = "session_end";
/// Device alert: sitting too long
pub const EVENT_SIT_ALERT: &str = "sit_alert";

/// One periodic telemetry report, stamped with the server receipt time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub ts: u64,
    #[serde(rename = "pir")]
    pub motion: bool,
    #[serde(rename = "ldr")]
    pub light_level: i64,
    #[serde(rename = "relay")]
    pub relay_on: bool,
    #[serde(rename = "auto")]
    pub auto_mode: bool,
    #[serde(rename = "wifi")]
    pub wifi_ok: bool,
    pub rssi: i64,
}

/// Occupancy accounting reported by the device inside telemetry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatSnapshot {
    pub seated: Option<bool>,
    pub session_id: Option<u64>,
    pub sit_ms: Option<u64>,
    pub away_ms: Option<u64>,
    pub leave_confirm_ms: Option<u64>,
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub ts: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub detail: String,
}

impl EventRecord {
    pub fn new(ts: u64, event_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            ts,
            event_type: event_type.into(),
            detail: detail.into(),
        }
    }

    /// Whether this is a `session_start` / `session_end` event
    pub fn is_lifecycle(&self) -> bool {
        self.event_type == EVENT_SESSION_START || self.event_type == EVENT_SESSION_END
    }
}

/// A closed sitting session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SittingSessionRecord {
    #[serde(rename = "ts_start")]
    pub started_at: u64,
    #[serde(rename = "ts_end")]
    pub ended_at: u64,
    /// Duration measured by the device, not `ended_at - started_at`
    pub duration_ms: u64,
    pub session_id: u64,
}

impl SittingSessionRecord {
    /// Duration in minutes, rounded to one decimal
    pub fn minutes(&self) -> f64 {
        round_tenth(self.duration_ms as f64 / 60_000.0)
    }
}

/// Standby text last shown on the device LCD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LcdMessageRecord {
    pub ts: u64,
    pub line2: String,
    pub line3: String,
    pub source: String,
}

/// A closed session with its bounds rendered as wall-clock times
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SittingSessionView {
    #[serde(flatten)]
    pub session: SittingSessionRecord,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub minutes: f64,
}

impl SittingSessionView {
    /// Render `session` in the time zone `tz`
    pub fn new<Tz>(session: SittingSessionRecord, tz: &Tz) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        let render = |ms: u64| {
            wall_clock(ms, tz).map(|t| t.format(WALL_CLOCK_FORMAT).to_string())
        };
        Self {
            start_time: render(session.started_at),
            end_time: render(session.ended_at),
            minutes: session.minutes(),
            session,
        }
    }
}

/// Sitting totals for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySitting {
    pub day: NaiveDate,
    pub total_minutes: f64,
    pub sessions: u32,
}

const DAY_MS: u64 = 24 * 60 * 60 * 1000;
const WALL_CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn wall_clock<Tz: TimeZone>(ms: u64, tz: &Tz) -> Option<DateTime<Tz>> {
    let ms = i64::try_from(ms).ok()?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.with_timezone(tz))
}

/// Summarize sessions that ended within the last `days` days, newest day first
///
/// Sessions are grouped by the calendar date of their end in `tz`.
pub fn sitting_summary<Tz: TimeZone>(
    sessions: &[SittingSessionRecord],
    days: u64,
    now_ms: u64,
    tz: &Tz,
) -> Vec<DailySitting> {
    let days = days.clamp(1, 90);
    let since = now_ms.saturating_sub(days * DAY_MS);

    let mut totals: BTreeMap<NaiveDate, (u64, u32)> = BTreeMap::new();
    for session in sessions.iter().filter(|s| s.ended_at >= since) {
        let Some(ended) = wall_clock(session.ended_at, tz) else {
            continue;
        };
        let entry = totals.entry(ended.date_naive()).or_default();
        entry.0 += session.duration_ms;
        entry.1 += 1;
    }

    totals
        .into_iter()
        .rev()
        .map(|(day, (duration_ms, sessions))| DailySitting {
            day,
            total_minutes: round_tenth(duration_ms as f64 / 60_000.0),
            sessions,
        })
        .collect()
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
