//! SmartDesk Shared Device Model
//!
//! This crate provides the transport-free core of the SmartDesk hub: the
//! inbound message codec, relay state reconciliation, the occupancy session
//! state machine and the outbound command grammar.

pub mod codec;
pub mod command;
pub mod device;
pub mod records;
pub mod relay;
pub mod state_machine;
pub mod topics;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use codec::{CodecError, DeviceEvent, EventKind, InboundMessage, MessageKind, TelemetryReport};
pub use command::{validate, CommandSpec, StandbyMessage, ValidationError};
pub use device::{DeviceState, Outcome, Record};
pub use records::{
    DailySitting, EventRecord, LcdMessageRecord, SeatSnapshot, SittingSessionRecord, SittingSessionView,
    TelemetrySample,
};
pub use relay::{RelayReconciler, RelaySource, RelayStateRecord, RelayUpdate};
pub use state_machine::{DiscardReason, OccupancyState, OccupancyStatus, OccupancyTracker, Transition};
pub use topics::Topics;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reference thresholds of the deployment
pub mod limits {
    /// Telemetry older than this marks the device as disconnected
    pub const STALE_AFTER_MS: u64 = 15_000;

    /// Sitting longer than this (in minutes) raises the long-sit flag
    pub const LONG_SIT_MINUTES: u64 = 60;

    /// Maximum characters of an `LCD:STANDBY:` payload
    pub const STANDBY_PAYLOAD_MAX_CHARS: usize = 120;

    /// Width of one LCD line (20x4 display)
    pub const LCD_LINE_MAX_CHARS: usize = 20;

    /// Bounds of the `LCD:STABLESEC:` parameter, in seconds
    pub const STABLE_SEC_MIN: i64 = 2;
    pub const STABLE_SEC_MAX: i64 = 60;
}

/// Milliseconds elapsed since `last_update_ms`, if anything was ever received
pub fn staleness_ms(last_update_ms: Option<u64>, now_ms: u64) -> Option<u64> {
    last_update_ms.map(|ts| now_ms.saturating_sub(ts))
}

/// Whether the device should be considered disconnected
///
/// A device that never reported is stale.
pub fn is_stale(last_update_ms: Option<u64>, now_ms: u64, threshold_ms: u64) -> bool {
    match staleness_ms(last_update_ms, now_ms) {
        Some(age) => age > threshold_ms,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staleness_never_received() {
        assert_eq!(staleness_ms(None, 1000), None);
        assert!(is_stale(None, 1000, limits::STALE_AFTER_MS));
    }

    #[test]
    fn test_staleness_threshold() {
        let last = Some(10_000);
        assert_eq!(staleness_ms(last, 20_000), Some(10_000));
        assert!(!is_stale(last, 10_000 + limits::STALE_AFTER_MS, limits::STALE_AFTER_MS));
        assert!(is_stale(last, 10_001 + limits::STALE_AFTER_MS, limits::STALE_AFTER_MS));
    }

    #[test]
    fn test_staleness_clock_skew() {
        // Sample stamped after "now" counts as fresh
        assert_eq!(staleness_ms(Some(5_000), 1_000), Some(0));
    }
}
