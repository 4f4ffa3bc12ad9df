//! Occupancy State Machine
//!
//! Tracks whether the monitored seat is occupied. Lifecycle events from the
//! device drive the transitions, telemetry refines the durations.
//!
//! ```text
//!            session_start
//!   AWAY  ------------------>  SEATED(session)
//!         <------------------
//!            session_end
//! ```
//!
//! Durations prefer the device clock (seat snapshots in telemetry) and fall
//! back to the server clock when the device has not reported them.

use serde::Serialize;
use serde_json::Value;

use crate::codec::{positive_id, EventKind};
use crate::limits;
use crate::records::{EventRecord, SeatSnapshot, SittingSessionRecord, TelemetrySample, EVENT_SESSION_START};

/// The session currently in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    /// Device session number; 0 when the device did not number it
    pub session_id: u64,
    /// Server time the session started
    pub started_at: u64,
    pub device_sit_ms: Option<u64>,
    pub device_away_ms: Option<u64>,
    /// Cleared when a seat snapshot reports `seated=false`
    pub device_seated: bool,
}

impl ActiveSession {
    fn new(session_id: u64, started_at: u64) -> Self {
        Self {
            session_id,
            started_at,
            device_sit_ms: None,
            device_away_ms: None,
            device_seated: true,
        }
    }
}

/// Occupancy state; only `Seated` carries a session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OccupancyState {
    #[default]
    Away,
    Seated(ActiveSession),
}

/// Why a `session_end` did not produce a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    NoActiveSession,
    NonPositiveDuration,
}

/// Result of feeding an input to the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// AWAY -> SEATED
    SessionStarted { session_id: u64 },
    /// `session_start` while already seated; the old session is dropped
    SessionReplaced { previous: u64, session_id: u64 },
    /// SEATED -> AWAY with a record to persist
    SessionClosed(SittingSessionRecord),
    /// Reset to AWAY without a record
    SessionDiscarded { reason: DiscardReason },
    /// Session taken over from a device snapshot
    SessionAdopted { session_id: u64 },
    /// Session rebuilt from the event log at startup
    SessionRecovered { session_id: u64 },
    /// Snapshot reported the seat empty before `session_end` arrived
    DeviceReportedAway { session_id: u64 },
    Unchanged,
}

/// Read-side view of occupancy at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyStatus {
    pub seated: bool,
    pub session_id: Option<u64>,
    pub started_at: Option<u64>,
    pub now: u64,
    pub sit_ms: u64,
    pub sit_minutes: u64,
    pub away_ms: u64,
    pub away_minutes: u64,
    pub away_seconds: u64,
    pub last_motion: bool,
    pub last_motion_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub leave_confirm_ms: u64,
    /// Sitting for at least the long-sit threshold
    pub long_sit: bool,
}

/// The occupancy session tracker
#[derive(Debug)]
pub struct OccupancyTracker {
    state: OccupancyState,
    last_motion: bool,
    last_motion_at: Option<u64>,
    last_event_at: Option<u64>,
    leave_confirm_ms: u64,
    long_sit_minutes: u64,
}

impl Default for OccupancyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OccupancyTracker {
    /// Create a tracker in the AWAY state
    pub fn new() -> Self {
        Self::with_long_sit_minutes(limits::LONG_SIT_MINUTES)
    }

    pub fn with_long_sit_minutes(long_sit_minutes: u64) -> Self {
        Self {
            state: OccupancyState::Away,
            last_motion: false,
            last_motion_at: None,
            last_event_at: None,
            leave_confirm_ms: 0,
            long_sit_minutes,
        }
    }

    /// Get current state
    pub fn state(&self) -> &OccupancyState {
        &self.state
    }

    pub fn is_seated(&self) -> bool {
        matches!(self.state, OccupancyState::Seated(_))
    }

    /// Process a device event received at `now_ms`
    pub fn on_event(&mut self, kind: &EventKind, now_ms: u64) -> Transition {
        self.last_event_at = Some(now_ms);

        match kind {
            EventKind::SessionStart { session_id } => {
                let session_id = session_id.unwrap_or(0);
                let previous = std::mem::replace(
                    &mut self.state,
                    OccupancyState::Seated(ActiveSession::new(session_id, now_ms)),
                );
                match previous {
                    OccupancyState::Seated(prev) => Transition::SessionReplaced {
                        previous: prev.session_id,
                        session_id,
                    },
                    OccupancyState::Away => Transition::SessionStarted { session_id },
                }
            }
            EventKind::SessionEnd {
                session_id,
                duration_ms,
            } => match std::mem::take(&mut self.state) {
                OccupancyState::Away => Transition::SessionDiscarded {
                    reason: DiscardReason::NoActiveSession,
                },
                OccupancyState::Seated(_) if *duration_ms <= 0 => Transition::SessionDiscarded {
                    reason: DiscardReason::NonPositiveDuration,
                },
                OccupancyState::Seated(session) => Transition::SessionClosed(SittingSessionRecord {
                    started_at: session.started_at,
                    ended_at: now_ms,
                    duration_ms: *duration_ms as u64,
                    session_id: session_id.unwrap_or(session.session_id),
                }),
            },
            EventKind::Other => Transition::Unchanged,
        }
    }

    /// Process a telemetry sample and its optional seat snapshot
    pub fn on_telemetry(
        &mut self,
        sample: &TelemetrySample,
        seat: Option<&SeatSnapshot>,
        now_ms: u64,
    ) -> Transition {
        let transition = match seat {
            Some(seat) => self.apply_snapshot(seat, now_ms),
            None => Transition::Unchanged,
        };

        self.last_motion = sample.motion;
        if sample.motion {
            self.last_motion_at = Some(sample.ts);
            if let OccupancyState::Seated(session) = &mut self.state {
                session.device_away_ms = Some(0);
            }
        }

        transition
    }

    fn apply_snapshot(&mut self, seat: &SeatSnapshot, now_ms: u64) -> Transition {
        if let Some(ms) = seat.leave_confirm_ms {
            self.leave_confirm_ms = ms;
        }

        if let OccupancyState::Seated(session) = &mut self.state {
            let was_seated = session.device_seated;
            if let Some(seated) = seat.seated {
                session.device_seated = seated;
            }
            if let Some(id) = seat.session_id {
                session.session_id = id;
            }
            if let Some(ms) = seat.sit_ms {
                session.device_sit_ms = Some(ms);
            }
            if let Some(ms) = seat.away_ms {
                session.device_away_ms = Some(ms);
            }

            if !session.device_seated {
                session.device_sit_ms = Some(0);
                session.device_away_ms = Some(0);
                if was_seated {
                    return Transition::DeviceReportedAway {
                        session_id: session.session_id,
                    };
                }
            }
            return Transition::Unchanged;
        }

        // AWAY: take over a session the device says is running
        match (seat.seated, seat.session_id) {
            (Some(true), Some(session_id)) => {
                let mut session = ActiveSession::new(session_id, now_ms.saturating_sub(seat.sit_ms.unwrap_or(0)));
                session.device_sit_ms = seat.sit_ms;
                session.device_away_ms = seat.away_ms;
                self.state = OccupancyState::Seated(session);
                Transition::SessionAdopted { session_id }
            }
            _ => Transition::Unchanged,
        }
    }

    /// Rebuild the active session from the most recent lifecycle event
    ///
    /// Anything other than a `session_start` leaves the tracker untouched.
    pub fn recover(&mut self, last_lifecycle: Option<&EventRecord>) -> Transition {
        let event = match last_lifecycle {
            Some(event) if event.event_type == EVENT_SESSION_START => event,
            _ => return Transition::Unchanged,
        };

        let session_id = serde_json::from_str::<Value>(&event.detail)
            .ok()
            .and_then(|detail| positive_id(detail.get("session_id")))
            .unwrap_or(0);

        self.state = OccupancyState::Seated(ActiveSession::new(session_id, event.ts));
        Transition::SessionRecovered { session_id }
    }

    /// Occupancy as seen at `now_ms`
    pub fn status(&self, now_ms: u64) -> OccupancyStatus {
        let session = match &self.state {
            OccupancyState::Seated(session) => Some(session),
            OccupancyState::Away => None,
        };
        let seated = session.map(|s| s.device_seated).unwrap_or(false);

        let (sit_ms, away_ms) = match session {
            Some(s) if s.device_seated => {
                let sit_ms = s
                    .device_sit_ms
                    .filter(|ms| *ms > 0)
                    .unwrap_or_else(|| now_ms.saturating_sub(s.started_at));
                let away_ms = s
                    .device_away_ms
                    .filter(|ms| *ms > 0)
                    .or_else(|| match (self.last_motion, self.last_motion_at) {
                        (false, Some(at)) => Some(now_ms.saturating_sub(at)),
                        _ => None,
                    })
                    .unwrap_or(0);
                (sit_ms, away_ms)
            }
            _ => (0, 0),
        };

        let sit_minutes = sit_ms / 60_000;
        OccupancyStatus {
            seated,
            session_id: session.map(|s| s.session_id),
            started_at: session.map(|s| s.started_at),
            now: now_ms,
            sit_ms,
            sit_minutes,
            away_ms,
            away_minutes: away_ms / 60_000,
            away_seconds: away_ms / 1000,
            last_motion: self.last_motion,
            last_motion_at: self.last_motion_at,
            last_event_at: self.last_event_at,
            leave_confirm_ms: self.leave_confirm_ms,
            long_sit: seated && sit_minutes >= self.long_sit_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(id: u64) -> EventKind {
        EventKind::SessionStart { session_id: Some(id) }
    }

    fn end(id: u64, duration_ms: i64) -> EventKind {
        EventKind::SessionEnd {
            session_id: Some(id),
            duration_ms,
        }
    }

    fn sample(ts: u64, motion: bool) -> TelemetrySample {
        TelemetrySample {
            ts,
            motion,
            light_level: 300,
            relay_on: false,
            auto_mode: true,
            wifi_ok: true,
            rssi: -55,
        }
    }

    #[test]
    fn test_initial_state() {
        let tracker = OccupancyTracker::new();
        assert_eq!(tracker.state(), &OccupancyState::Away);
        let status = tracker.status(1000);
        assert!(!status.seated);
        assert_eq!(status.session_id, None);
        assert_eq!(status.sit_ms, 0);
    }

    #[test]
    fn test_full_session() {
        let mut tracker = OccupancyTracker::new();
        let t0 = 1_000_000;

        let result = tracker.on_event(&start(7), t0);
        assert_eq!(result, Transition::SessionStarted { session_id: 7 });
        assert!(tracker.is_seated());

        let result = tracker.on_event(&end(7, 600_000), t0 + 600_000);
        assert_eq!(
            result,
            Transition::SessionClosed(SittingSessionRecord {
                started_at: t0,
                ended_at: t0 + 600_000,
                duration_ms: 600_000,
                session_id: 7,
            })
        );
        assert_eq!(tracker.state(), &OccupancyState::Away);
    }

    #[test]
    fn test_device_duration_is_authoritative() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(3), 1000);
        // Server clock says 10s, device measured 9.5s
        let result = tracker.on_event(&end(3, 9_500), 11_000);
        let Transition::SessionClosed(record) = result else {
            panic!("expected a closed session");
        };
        assert_eq!(record.duration_ms, 9_500);
        assert_eq!(record.ended_at - record.started_at, 10_000);
    }

    #[test]
    fn test_end_while_away_is_discarded() {
        let mut tracker = OccupancyTracker::new();
        let result = tracker.on_event(&end(1, 5000), 1000);
        assert_eq!(
            result,
            Transition::SessionDiscarded {
                reason: DiscardReason::NoActiveSession
            }
        );
        assert_eq!(tracker.state(), &OccupancyState::Away);
    }

    #[test]
    fn test_end_without_duration_resets() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(2), 1000);
        let result = tracker.on_event(&end(2, 0), 2000);
        assert_eq!(
            result,
            Transition::SessionDiscarded {
                reason: DiscardReason::NonPositiveDuration
            }
        );
        assert!(!tracker.is_seated());
    }

    #[test]
    fn test_end_without_id_uses_active_session() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(11), 1000);
        let result = tracker.on_event(
            &EventKind::SessionEnd {
                session_id: None,
                duration_ms: 500,
            },
            2000,
        );
        let Transition::SessionClosed(record) = result else {
            panic!("expected a closed session");
        };
        assert_eq!(record.session_id, 11);
    }

    #[test]
    fn test_restart_replaces_session() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(1), 1000);
        let result = tracker.on_event(&start(2), 5000);
        assert_eq!(result, Transition::SessionReplaced { previous: 1, session_id: 2 });
        assert_eq!(tracker.status(6000).started_at, Some(5000));
    }

    #[test]
    fn test_unknown_event_only_touches_last_event() {
        let mut tracker = OccupancyTracker::new();
        assert_eq!(tracker.on_event(&EventKind::Other, 4242), Transition::Unchanged);
        assert_eq!(tracker.state(), &OccupancyState::Away);
        assert_eq!(tracker.status(5000).last_event_at, Some(4242));
    }

    #[test]
    fn test_server_clock_fallback() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(1), 10_000);
        tracker.on_telemetry(&sample(11_000, true), None, 11_000);
        tracker.on_telemetry(&sample(20_000, false), None, 20_000);

        let status = tracker.status(71_000);
        assert!(status.seated);
        assert_eq!(status.sit_ms, 61_000);
        assert_eq!(status.sit_minutes, 1);
        // Last motion at 11s
        assert_eq!(status.away_ms, 60_000);
        assert_eq!(status.away_seconds, 60);
        assert_eq!(status.last_motion_at, Some(11_000));
    }

    #[test]
    fn test_away_zero_while_motion() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(1), 10_000);
        tracker.on_telemetry(&sample(15_000, true), None, 15_000);
        assert_eq!(tracker.status(30_000).away_ms, 0);
    }

    #[test]
    fn test_snapshot_overrides_durations() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(1), 10_000);
        let seat = SeatSnapshot {
            seated: Some(true),
            session_id: Some(1),
            sit_ms: Some(42_000),
            away_ms: Some(7_000),
            leave_confirm_ms: Some(30_000),
        };
        tracker.on_telemetry(&sample(20_000, false), Some(&seat), 20_000);

        let status = tracker.status(500_000);
        assert_eq!(status.sit_ms, 42_000);
        assert_eq!(status.away_ms, 7_000);
        assert_eq!(status.leave_confirm_ms, 30_000);
    }

    #[test]
    fn test_motion_resets_device_away() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(1), 10_000);
        let seat = SeatSnapshot {
            away_ms: Some(7_000),
            ..Default::default()
        };
        tracker.on_telemetry(&sample(20_000, true), Some(&seat), 20_000);
        assert_eq!(tracker.status(20_500).away_ms, 0);
    }

    #[test]
    fn test_snapshot_not_seated_zeroes_durations() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(5), 10_000);
        let seat = SeatSnapshot {
            seated: Some(false),
            sit_ms: Some(90_000),
            ..Default::default()
        };
        let result = tracker.on_telemetry(&sample(100_000, false), Some(&seat), 100_000);
        assert_eq!(result, Transition::DeviceReportedAway { session_id: 5 });

        let status = tracker.status(200_000);
        assert!(!status.seated);
        assert_eq!(status.sit_ms, 0);
        assert_eq!(status.away_ms, 0);
        assert!(!status.long_sit);

        // The explicit end still closes the session
        let result = tracker.on_event(&end(5, 90_000), 110_000);
        assert!(matches!(result, Transition::SessionClosed(_)));
    }

    #[test]
    fn test_snapshot_adopts_session_while_away() {
        let mut tracker = OccupancyTracker::new();
        let seat = SeatSnapshot {
            seated: Some(true),
            session_id: Some(9),
            sit_ms: Some(60_000),
            ..Default::default()
        };
        let result = tracker.on_telemetry(&sample(100_000, true), Some(&seat), 100_000);
        assert_eq!(result, Transition::SessionAdopted { session_id: 9 });

        let status = tracker.status(100_000);
        assert!(status.seated);
        assert_eq!(status.session_id, Some(9));
        assert_eq!(status.started_at, Some(40_000));
        assert_eq!(status.sit_ms, 60_000);
    }

    #[test]
    fn test_snapshot_without_id_ignored_while_away() {
        let mut tracker = OccupancyTracker::new();
        let seat = SeatSnapshot {
            seated: Some(true),
            ..Default::default()
        };
        assert_eq!(tracker.on_telemetry(&sample(1, false), Some(&seat), 1), Transition::Unchanged);
        assert!(!tracker.is_seated());
    }

    #[test]
    fn test_long_sit_flag() {
        let mut tracker = OccupancyTracker::new();
        tracker.on_event(&start(1), 0);
        assert!(!tracker.status(59 * 60_000).long_sit);
        assert!(tracker.status(60 * 60_000).long_sit);

        let mut short = OccupancyTracker::with_long_sit_minutes(1);
        short.on_event(&start(1), 0);
        assert!(short.status(60_000).long_sit);
    }

    #[test]
    fn test_recover_from_session_start() {
        let mut tracker = OccupancyTracker::new();
        let event = EventRecord::new(5000, "session_start", r#"{"type":"session_start","session_id":12}"#);
        assert_eq!(tracker.recover(Some(&event)), Transition::SessionRecovered { session_id: 12 });

        let status = tracker.status(65_000);
        assert!(status.seated);
        assert_eq!(status.session_id, Some(12));
        assert_eq!(status.sit_ms, 60_000);
    }

    #[test]
    fn test_recover_with_corrupt_detail() {
        let mut tracker = OccupancyTracker::new();
        let event = EventRecord::new(5000, "session_start", "{oops");
        assert_eq!(tracker.recover(Some(&event)), Transition::SessionRecovered { session_id: 0 });
        assert!(tracker.is_seated());
    }

    #[test]
    fn test_recover_after_session_end_or_empty_log() {
        let mut tracker = OccupancyTracker::new();
        assert_eq!(tracker.recover(None), Transition::Unchanged);
        let event = EventRecord::new(5000, "session_end", r#"{"duration_ms":1}"#);
        assert_eq!(tracker.recover(Some(&event)), Transition::Unchanged);
        assert!(!tracker.is_seated());
    }
}
