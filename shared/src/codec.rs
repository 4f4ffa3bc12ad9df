//! Inbound message codec
//!
//! Classifies a raw MQTT message by topic and payload shape and decodes it
//! once into a typed [`InboundMessage`]. Nothing downstream sees untyped JSON.
//!
//! ```text
//! relay/state  -> RelayState(RelayUpdate)
//! telemetry    -> {"type": "..."} object  -> Event(DeviceEvent)
//!              -> any other object        -> Telemetry(TelemetryReport)
//! other topics -> Unrecognized
//! ```
//!
//! Decoding is stateless: no message is correlated with any other.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::records::{SeatSnapshot, TelemetrySample, EVENT_SESSION_END, EVENT_SESSION_START};
use crate::relay::{self, RelayUpdate};
use crate::topics::Topics;

/// Errors that can occur while decoding an inbound message
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Field `{field}` is not a finite number: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Unrecognized relay state payload: {0:?}")]
    UnrecognizedRelayPayload(String),
}

/// Logical kind of an inbound message, decided by topic alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    RelayStateUpdate,
    TelemetryOrEvent,
    Unrecognized,
}

/// A fully decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Explicit relay acknowledgement from the device
    RelayState(RelayUpdate),
    /// Discrete device event (lifecycle or forward-compatible)
    Event(DeviceEvent),
    /// Periodic telemetry sample
    Telemetry(TelemetryReport),
    /// Message on a topic this hub does not handle
    Unrecognized { topic: String },
}

/// Telemetry sample plus the optional occupancy snapshot it carried
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReport {
    pub sample: TelemetrySample,
    pub seat: Option<SeatSnapshot>,
}

/// A typed device event
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub kind: EventKind,
    /// Value of the `type` field
    pub event_type: String,
    /// Original JSON text, logged verbatim
    pub detail: String,
}

/// Events the occupancy tracker understands
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    SessionStart {
        session_id: Option<u64>,
    },
    SessionEnd {
        session_id: Option<u64>,
        /// Device-measured duration; zero when missing or malformed
        duration_ms: i64,
    },
    /// Unknown type, kept for the event log only
    Other,
}

/// Decode a raw message received on `topic`
///
/// `now_ms` is the server receipt time stamped on telemetry samples.
pub fn decode(
    topics: &Topics,
    topic: &str,
    payload: &[u8],
    now_ms: u64,
) -> Result<InboundMessage, CodecError> {
    match topics.classify(topic) {
        MessageKind::RelayStateUpdate => {
            let raw = std::str::from_utf8(payload)?.trim();
            relay::parse_relay_payload(raw)
                .map(InboundMessage::RelayState)
                .ok_or_else(|| CodecError::UnrecognizedRelayPayload(raw.to_string()))
        }
        MessageKind::TelemetryOrEvent => decode_telemetry_or_event(payload, now_ms),
        MessageKind::Unrecognized => Ok(InboundMessage::Unrecognized {
            topic: topic.to_string(),
        }),
    }
}

/// Decode a payload from the telemetry topic
pub fn decode_telemetry_or_event(payload: &[u8], now_ms: u64) -> Result<InboundMessage, CodecError> {
    let text = std::str::from_utf8(payload)?.trim();
    let value: Value = serde_json::from_str(text)?;
    let obj = value.as_object().ok_or(CodecError::NotAnObject)?;

    if let Some(Value::String(event_type)) = obj.get("type") {
        return Ok(InboundMessage::Event(decode_event(event_type, obj, text)));
    }

    let sample = TelemetrySample {
        ts: now_ms,
        motion: field_number(obj, "pir", 0.0)? != 0.0,
        light_level: field_number(obj, "ldr", 0.0)? as i64,
        relay_on: field_number(obj, "relay", 0.0)? != 0.0,
        auto_mode: field_number(obj, "auto", 1.0)? != 0.0,
        wifi_ok: field_number(obj, "wifi", 1.0)? != 0.0,
        rssi: field_number(obj, "rssi", -999.0)? as i64,
    };

    let seat = match obj.get("seat") {
        Some(Value::Object(seat)) => Some(decode_seat(seat)),
        _ => None,
    };

    Ok(InboundMessage::Telemetry(TelemetryReport { sample, seat }))
}

fn decode_event(event_type: &str, obj: &Map<String, Value>, text: &str) -> DeviceEvent {
    let kind = match event_type {
        EVENT_SESSION_START => EventKind::SessionStart {
            session_id: positive_id(obj.get("session_id")),
        },
        EVENT_SESSION_END => EventKind::SessionEnd {
            session_id: positive_id(obj.get("session_id")),
            duration_ms: duration_millis(obj.get("duration_ms")),
        },
        _ => EventKind::Other,
    };

    DeviceEvent {
        kind,
        event_type: event_type.to_string(),
        detail: text.to_string(),
    }
}

/// Device snapshots are decoded leniently: garbage reads as zero
fn decode_seat(seat: &Map<String, Value>) -> SeatSnapshot {
    let millis = |key: &str| seat.get(key).map(|v| lenient_number(v).max(0.0) as u64);

    SeatSnapshot {
        seated: seat.get("seated").map(|v| lenient_number(v) != 0.0),
        session_id: positive_id(seat.get("session_id")),
        sit_ms: millis("sit_ms"),
        away_ms: millis("away_ms"),
        leave_confirm_ms: millis("leave_confirm_ms"),
    }
}

/// Extract a session id from an event or snapshot field
///
/// Zero, negative and malformed ids mean "no id".
pub fn positive_id(value: Option<&Value>) -> Option<u64> {
    let n = value.map(lenient_number).unwrap_or(0.0);
    if n >= 1.0 {
        Some(n as u64)
    } else {
        None
    }
}

/// Telemetry field with a default for missing/null; present garbage is an error
fn field_number(obj: &Map<String, Value>, field: &'static str, default: f64) -> Result<f64, CodecError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => coerce_number(value).ok_or_else(|| CodecError::InvalidField {
            field,
            value: value.to_string(),
        }),
    }
}

/// Coerce a JSON scalar to a finite number
///
/// Accepts numbers, booleans and numeric strings (blank reads as zero).
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().ok()?
            }
        }
        Value::Array(_) | Value::Object(_) => return None,
    };
    n.is_finite().then_some(n)
}

fn lenient_number(value: &Value) -> f64 {
    coerce_number(value).unwrap_or(0.0)
}

/// Positive fractions round up so a sub-millisecond session still counts
fn duration_millis(value: Option<&Value>) -> i64 {
    let ms = value.map(lenient_number).unwrap_or(0.0);
    if ms > 0.0 {
        ms.ceil() as i64
    } else {
        ms as i64
    }
}
