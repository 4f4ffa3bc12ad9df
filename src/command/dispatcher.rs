//! Command dispatcher for sending validated commands to the desk

use crate::device::DeviceContext;
use crate::transport::Publisher;
use bytes::Bytes;
use serde::Serialize;
use smartdesk_shared::records::{EVENT_CMD_SENT, EVENT_LCD_STANDBY_SET};
use smartdesk_shared::{now_ms, EventRecord, LcdMessageRecord, Record, StandbyMessage, ValidationError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where a dispatched command went
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub topic: String,
    pub command: String,
    /// Set when a standby message was also retained
    pub retained_topic: Option<String>,
}

/// Result of a dispatch attempt
#[derive(Debug)]
pub enum DispatchResult {
    /// Published to the device
    Sent(DispatchOutcome),
    /// Rejected by validation; nothing was published
    Rejected(ValidationError),
    /// Valid but the publish itself failed
    Failed { command: String, message: String },
}

/// Retained standby payload, replayed by the broker when the device reconnects
#[derive(Debug, Serialize)]
struct RetainedStandby<'a> {
    ts: u64,
    line2: &'a str,
    line3: &'a str,
    source: &'static str,
}

/// Validates, publishes and records outbound commands
pub struct CommandDispatcher {
    context: Arc<DeviceContext>,
    publisher: Arc<dyn Publisher>,
    command_id: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(context: Arc<DeviceContext>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            context,
            publisher,
            command_id: AtomicU64::new(0),
        }
    }

    fn next_command_id(&self) -> u64 {
        self.command_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Send a candidate command on behalf of `origin`
    pub async fn send(&self, candidate: &str, origin: &str) -> DispatchResult {
        self.send_at(candidate, origin, now_ms()).await
    }

    pub async fn send_at(&self, candidate: &str, origin: &str, now: u64) -> DispatchResult {
        let spec = match self.context.validate_command(candidate) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("[CMD] Rejected {:?} from {}: {}", candidate.trim(), origin, e);
                return DispatchResult::Rejected(e);
            }
        };

        let id = self.next_command_id();
        let topic = self.context.topics().command.clone();
        let payload = Bytes::from(spec.command.clone());

        if let Err(e) = self.publisher.publish(&topic, payload, false).await {
            error!("[CMD] #{} {} via {} failed: {:#}", id, spec.command, self.publisher.name(), e);
            return DispatchResult::Failed {
                command: spec.command,
                message: format!("{:#}", e),
            };
        }
        info!("[CMD] #{} Sent {} -> {} ({})", id, spec.command, topic, origin);

        let sent = Record::Event(EventRecord::new(now, EVENT_CMD_SENT, spec.command.as_str()));
        if let Err(e) = self.context.append_records(vec![sent]).await {
            error!("[STORE] Failed to record command #{}: {:#}", id, e);
        }

        let retained_topic = match &spec.standby {
            Some(standby) => Some(self.apply_standby(standby, origin, now).await),
            None => None,
        };

        DispatchResult::Sent(DispatchOutcome {
            topic,
            command: spec.command,
            retained_topic,
        })
    }

    /// Persist the standby text and retain it for the device
    async fn apply_standby(&self, standby: &StandbyMessage, origin: &str, now: u64) -> String {
        let message = LcdMessageRecord {
            ts: now,
            line2: standby.line2.clone(),
            line3: standby.line3.clone(),
            source: origin.to_string(),
        };
        if let Err(e) = self.context.append_lcd_message(message.clone()).await {
            error!("[STORE] Failed to record standby message: {:#}", e);
        }

        let detail = format!("line2={:?} line3={:?}", standby.line2, standby.line3);
        let event = Record::Event(EventRecord::new(now, EVENT_LCD_STANDBY_SET, detail));
        if let Err(e) = self.context.append_records(vec![event]).await {
            error!("[STORE] Failed to record standby event: {:#}", e);
        }

        let topic = self.context.topics().lcd_standby.clone();
        let retained = RetainedStandby {
            ts: now,
            line2: &standby.line2,
            line3: &standby.line3,
            source: "retained",
        };
        match serde_json::to_vec(&retained) {
            Ok(body) => {
                if let Err(e) = self.publisher.publish(&topic, Bytes::from(body), true).await {
                    warn!("[CMD] Failed to retain standby message: {:#}", e);
                }
            }
            Err(e) => warn!("[CMD] Failed to encode standby message: {}", e),
        }
        topic
    }
}
