//! MQTT topic layout for one device

use crate::codec::MessageKind;

/// Topic names under `smartdesk/<device_id>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub relay_state: String,
    pub command: String,
    pub lcd_standby: String,
}

impl Topics {
    /// Build the topic set for a device
    pub fn for_device(device_id: &str) -> Self {
        let prefix = format!("smartdesk/{}", device_id);
        Self {
            telemetry: format!("{}/telemetry", prefix),
            relay_state: format!("{}/relay/state", prefix),
            command: format!("{}/cmd", prefix),
            lcd_standby: format!("{}/lcd/standby", prefix),
        }
    }

    /// Topics the hub subscribes to
    pub fn inbound(&self) -> [&str; 2] {
        [&self.telemetry, &self.relay_state]
    }

    /// Classify an inbound topic
    pub fn classify(&self, topic: &str) -> MessageKind {
        if topic == self.relay_state {
            MessageKind::RelayStateUpdate
        } else if topic == self.telemetry {
            MessageKind::TelemetryOrEvent
        } else {
            MessageKind::Unrecognized
        }
    }
}
