//! Aggregate device state
//!
//! Everything the hub knows about one device, rebuilt from the stores at
//! startup and updated message by message. Applying a message returns the
//! records it produced; persisting them is the caller's job.

use crate::codec::InboundMessage;
use crate::limits;
use crate::records::{EventRecord, SittingSessionRecord, TelemetrySample};
use crate::relay::{RelayReconciler, RelayStateRecord};
use crate::state_machine::{OccupancyStatus, OccupancyTracker, Transition};

/// A row to append to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Telemetry(TelemetrySample),
    Event(EventRecord),
    Session(SittingSessionRecord),
}

/// What applying one inbound message did
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub records: Vec<Record>,
    pub transition: Transition,
}

impl Outcome {
    fn records(records: Vec<Record>) -> Self {
        Self {
            records,
            transition: Transition::Unchanged,
        }
    }
}

/// Relay, occupancy and connectivity state of one device
#[derive(Debug)]
pub struct DeviceState {
    relay: RelayReconciler,
    occupancy: OccupancyTracker,
    last_telemetry_at: Option<u64>,
    stale_after_ms: u64,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    /// Create an empty state with the reference thresholds
    pub fn new() -> Self {
        Self::with_thresholds(limits::STALE_AFTER_MS, limits::LONG_SIT_MINUTES)
    }

    pub fn with_thresholds(stale_after_ms: u64, long_sit_minutes: u64) -> Self {
        Self {
            relay: RelayReconciler::new(),
            occupancy: OccupancyTracker::with_long_sit_minutes(long_sit_minutes),
            last_telemetry_at: None,
            stale_after_ms,
        }
    }

    /// Rebuild from persisted history after a restart
    pub fn restore(
        &mut self,
        latest_telemetry: Option<&TelemetrySample>,
        last_lifecycle: Option<&EventRecord>,
    ) -> Transition {
        if let Some(sample) = latest_telemetry {
            self.relay.seed(sample);
            self.last_telemetry_at = Some(sample.ts);
        }
        self.occupancy
            .recover(last_lifecycle.filter(|event| event.is_lifecycle()))
    }

    /// Apply one decoded inbound message received at `now_ms`
    pub fn apply(&mut self, message: InboundMessage, now_ms: u64) -> Outcome {
        match message {
            InboundMessage::RelayState(update) => {
                let ack = self.relay.apply_explicit(update, now_ms);
                Outcome::records(vec![Record::Event(ack)])
            }
            InboundMessage::Event(event) => {
                let mut records = vec![Record::Event(EventRecord::new(
                    now_ms,
                    event.event_type,
                    event.detail,
                ))];
                let transition = self.occupancy.on_event(&event.kind, now_ms);
                if let Transition::SessionClosed(session) = &transition {
                    records.push(Record::Session(session.clone()));
                }
                Outcome { records, transition }
            }
            InboundMessage::Telemetry(report) => {
                let change = self.relay.apply_telemetry(&report.sample, now_ms);
                let transition = self
                    .occupancy
                    .on_telemetry(&report.sample, report.seat.as_ref(), now_ms);
                self.last_telemetry_at = Some(report.sample.ts);

                let mut records = vec![Record::Telemetry(report.sample)];
                records.extend(change.map(Record::Event));
                Outcome { records, transition }
            }
            InboundMessage::Unrecognized { .. } => Outcome::records(Vec::new()),
        }
    }

    pub fn current_relay_state(&self) -> RelayStateRecord {
        self.relay.current()
    }

    pub fn occupancy_status(&self, now_ms: u64) -> OccupancyStatus {
        self.occupancy.status(now_ms)
    }

    pub fn occupancy(&self) -> &OccupancyTracker {
        &self.occupancy
    }

    pub fn last_telemetry_at(&self) -> Option<u64> {
        self.last_telemetry_at
    }

    /// Age of the last telemetry sample
    pub fn staleness_ms(&self, now_ms: u64) -> Option<u64> {
        crate::staleness_ms(self.last_telemetry_at, now_ms)
    }

    /// Whether the device should be shown as disconnected
    pub fn is_stale(&self, now_ms: u64) -> bool {
        crate::is_stale(self.last_telemetry_at, now_ms, self.stale_after_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;
    use crate::relay::RelaySource;
    use crate::topics::Topics;

    struct Harness {
        topics: Topics,
        state: DeviceState,
        records: Vec<Record>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                topics: Topics::for_device("desk"),
                state: DeviceState::new(),
                records: Vec::new(),
            }
        }

        fn telemetry(&mut self, payload: &str, now: u64) {
            self.feed("smartdesk/desk/telemetry", payload, now);
        }

        fn relay(&mut self, payload: &str, now: u64) {
            self.feed("smartdesk/desk/relay/state", payload, now);
        }

        fn feed(&mut self, topic: &str, payload: &str, now: u64) {
            if let Ok(msg) = decode(&self.topics, topic, payload.as_bytes(), now) {
                let outcome = self.state.apply(msg, now);
                self.records.extend(outcome.records);
            }
        }

        fn events_of(&self, event_type: &str) -> Vec<&EventRecord> {
            self.records
                .iter()
                .filter_map(|r| match r {
                    Record::Event(e) if e.event_type == event_type => Some(e),
                    _ => None,
                })
                .collect()
        }

        fn sessions(&self) -> Vec<&SittingSessionRecord> {
            self.records
                .iter()
                .filter_map(|r| match r {
                    Record::Session(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn test_session_lifecycle_end_to_end() {
        let mut h = Harness::new();
        h.telemetry(r#"{"type":"session_start","session_id":7}"#, 1_000);
        h.telemetry(r#"{"type":"session_end","session_id":7,"duration_ms":600000}"#, 601_000);

        let sessions = h.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_ms, 600_000);
        assert_eq!(sessions[0].session_id, 7);
        assert!(!h.state.occupancy().is_seated());

        // Both lifecycle events are logged verbatim
        assert_eq!(h.events_of("session_start").len(), 1);
        assert_eq!(
            h.events_of("session_end")[0].detail,
            r#"{"type":"session_end","session_id":7,"duration_ms":600000}"#
        );
    }

    #[test]
    fn test_fractional_duration_is_persisted() {
        let mut h = Harness::new();
        h.telemetry(r#"{"type":"session_start","session_id":2}"#, 1_000);
        h.telemetry(r#"{"type":"session_end","session_id":2,"duration_ms":0.5}"#, 1_001);

        let sessions = h.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].duration_ms, 1);
    }

    #[test]
    fn test_restore_ignores_non_lifecycle_event() {
        let mut state = DeviceState::new();
        let alert = EventRecord::new(4_000, "sit_alert", r#"{"type":"session_start","session_id":4}"#);
        assert_eq!(state.restore(None, Some(&alert)), Transition::Unchanged);
        assert!(!state.occupancy().is_seated());
    }

    #[test]
    fn test_session_end_while_away() {
        let mut h = Harness::new();
        h.telemetry(r#"{"type":"session_end","session_id":3,"duration_ms":5000}"#, 1_000);
        assert!(h.sessions().is_empty());
        assert_eq!(h.events_of("session_end").len(), 1);
    }

    #[test]
    fn test_relay_edges_from_telemetry() {
        let mut h = Harness::new();
        for (i, relay) in [0, 0, 1, 1, 0].into_iter().enumerate() {
            h.telemetry(&format!(r#"{{"relay":{}}}"#, relay), 1_000 + i as u64);
        }
        let changes = h.events_of("RELAY_CHANGE");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].ts, 1_002);
        assert_eq!(changes[1].ts, 1_004);
        assert_eq!(h.state.current_relay_state().source, Some(RelaySource::TelemetryFallback));
    }

    #[test]
    fn test_relay_ack_and_ignored_payloads() {
        let mut h = Harness::new();
        h.relay("banana", 1_000);
        assert!(h.events_of("RELAY_ACK").is_empty());
        assert_eq!(h.state.current_relay_state(), RelayStateRecord::UNKNOWN);

        h.relay(r#"{"relay":1,"ts":900}"#, 1_000);
        assert_eq!(h.events_of("RELAY_ACK")[0].detail, "relay=1");
        let relay = h.state.current_relay_state();
        assert_eq!(relay.value, Some(true));
        assert_eq!(relay.observed_at, Some(900));

        h.telemetry(r#"{"relay":0}"#, 2_000);
        assert_eq!(h.state.current_relay_state().source, Some(RelaySource::Telemetry));
    }

    #[test]
    fn test_malformed_telemetry_is_dropped() {
        let mut h = Harness::new();
        h.telemetry("{broken", 1_000);
        assert!(h.records.is_empty());
        assert_eq!(h.state.last_telemetry_at(), None);
    }

    #[test]
    fn test_staleness_tracks_telemetry_only() {
        let mut h = Harness::new();
        assert!(h.state.is_stale(0));

        h.telemetry(r#"{"pir":1}"#, 10_000);
        h.telemetry(r#"{"type":"heartbeat"}"#, 30_000);
        assert_eq!(h.state.staleness_ms(30_000), Some(20_000));
        assert!(h.state.is_stale(30_000));
        assert!(!h.state.is_stale(20_000));
    }

    #[test]
    fn test_restore_from_history() {
        let mut state = DeviceState::new();
        let sample = TelemetrySample {
            ts: 5_000,
            motion: false,
            light_level: 10,
            relay_on: true,
            auto_mode: true,
            wifi_ok: true,
            rssi: -70,
        };
        let start = EventRecord::new(4_000, "session_start", r#"{"type":"session_start","session_id":4}"#);

        let transition = state.restore(Some(&sample), Some(&start));
        assert_eq!(transition, Transition::SessionRecovered { session_id: 4 });
        assert_eq!(state.current_relay_state().value, Some(true));
        assert_eq!(state.last_telemetry_at(), Some(5_000));
        assert_eq!(state.occupancy_status(64_000).sit_ms, 60_000);
    }

    #[test]
    fn test_restore_from_empty_history() {
        let mut state = DeviceState::new();
        assert_eq!(state.restore(None, None), Transition::Unchanged);
        assert!(!state.occupancy().is_seated());
        assert_eq!(state.current_relay_state(), RelayStateRecord::UNKNOWN);
    }
}
