//! Relay State Reconciler
//!
//! Two channels report the relay output: the explicit `relay/state` topic
//! (the device acknowledging what it actually switched) and the `relay` field
//! of every telemetry sample. Neither is assumed to arrive in order with the
//! other, so both are kept as typed observations and merged on read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::coerce_number;
use crate::records::{EventRecord, TelemetrySample, EVENT_RELAY_ACK, EVENT_RELAY_CHANGE};

/// Decoded explicit relay acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayUpdate {
    pub value: bool,
    /// Device-supplied timestamp overriding the receipt time
    pub device_ts: Option<u64>,
}

/// Where the reported relay value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelaySource {
    ExplicitChannel,
    Telemetry,
    TelemetryFallback,
}

impl RelaySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelaySource::ExplicitChannel => "explicit-channel",
            RelaySource::Telemetry => "telemetry",
            RelaySource::TelemetryFallback => "telemetry-fallback",
        }
    }
}

impl std::fmt::Display for RelaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-known relay state; `value: None` means unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStateRecord {
    pub value: Option<bool>,
    pub observed_at: Option<u64>,
    pub source: Option<RelaySource>,
}

impl RelayStateRecord {
    pub const UNKNOWN: Self = Self {
        value: None,
        observed_at: None,
        source: None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observation {
    value: bool,
    observed_at: u64,
    /// Arrival order across both channels
    seq: u64,
}

/// Merges explicit and telemetry relay observations
#[derive(Debug, Default)]
pub struct RelayReconciler {
    explicit: Option<Observation>,
    telemetry: Option<Observation>,
    /// Baseline for RELAY_CHANGE edge detection
    last_telemetry_value: Option<bool>,
    next_seq: u64,
}

impl RelayReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an explicit acknowledgement; always yields a `RELAY_ACK` event
    pub fn apply_explicit(&mut self, update: RelayUpdate, now_ms: u64) -> EventRecord {
        let seq = self.bump();
        self.explicit = Some(Observation {
            value: update.value,
            observed_at: update.device_ts.unwrap_or(now_ms),
            seq,
        });
        EventRecord::new(now_ms, EVENT_RELAY_ACK, relay_detail(update.value))
    }

    /// Accept the relay field of a telemetry sample
    ///
    /// Yields `RELAY_CHANGE` only when the value differs from the previous
    /// telemetry value. The first sample only sets the baseline.
    pub fn apply_telemetry(&mut self, sample: &TelemetrySample, now_ms: u64) -> Option<EventRecord> {
        let seq = self.bump();
        self.telemetry = Some(Observation {
            value: sample.relay_on,
            observed_at: sample.ts,
            seq,
        });

        let previous = self.last_telemetry_value.replace(sample.relay_on);
        match previous {
            Some(prev) if prev != sample.relay_on => {
                Some(EventRecord::new(now_ms, EVENT_RELAY_CHANGE, relay_detail(sample.relay_on)))
            }
            _ => None,
        }
    }

    /// Seed from the last persisted sample after a restart
    ///
    /// Does not touch the edge baseline and never overrides live data.
    pub fn seed(&mut self, sample: &TelemetrySample) {
        if self.explicit.is_none() && self.telemetry.is_none() {
            let seq = self.bump();
            self.telemetry = Some(Observation {
                value: sample.relay_on,
                observed_at: sample.ts,
                seq,
            });
        }
    }

    /// Current best-known relay state
    pub fn current(&self) -> RelayStateRecord {
        reconcile(self.explicit, self.telemetry)
    }

    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Priority merge of the two channels
fn reconcile(explicit: Option<Observation>, telemetry: Option<Observation>) -> RelayStateRecord {
    let (obs, source) = match (explicit, telemetry) {
        (None, None) => return RelayStateRecord::UNKNOWN,
        (None, Some(t)) => (t, RelaySource::TelemetryFallback),
        (Some(e), None) => (e, RelaySource::ExplicitChannel),
        // Once the explicit channel has spoken, the latest arrival wins
        (Some(e), Some(t)) if t.seq > e.seq => (t, RelaySource::Telemetry),
        (Some(e), Some(_)) => (e, RelaySource::ExplicitChannel),
    };

    RelayStateRecord {
        value: Some(obs.value),
        observed_at: Some(obs.observed_at),
        source: Some(source),
    }
}

fn relay_detail(value: bool) -> String {
    format!("relay={}", u8::from(value))
}

/// Parse an explicit relay-state payload
///
/// Accepts `0`/`1`, JSON booleans, boolean words (`on`, `off`, `true`,
/// `false`, quoted or bare, any case) and `{"relay": .., "ts": ..}` objects.
/// Returns `None` for anything else.
pub fn parse_relay_payload(raw: &str) -> Option<RelayUpdate> {
    let raw = raw.trim();
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(obj)) => {
            let value = obj.get("relay").and_then(relay_value)?;
            let device_ts = obj
                .get("ts")
                .and_then(Value::as_f64)
                .filter(|ts| ts.is_finite() && *ts >= 0.0)
                .map(|ts| ts as u64);
            Some(RelayUpdate { value, device_ts })
        }
        Ok(value) => relay_value(&value).map(|value| RelayUpdate {
            value,
            device_ts: None,
        }),
        Err(_) => bool_word(raw).map(|value| RelayUpdate {
            value,
            device_ts: None,
        }),
    }
}

fn relay_value(value: &Value) -> Option<bool> {
    match value {
        Value::String(s) => bool_word(s.trim()),
        Value::Number(_) | Value::Bool(_) => coerce_number(value).map(|n| n != 0.0),
        _ => None,
    }
}

fn bool_word(word: &str) -> Option<bool> {
    match word.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Some(true),
        "0" | "off" | "false" => Some(false),
        _ => None,
    }
}
