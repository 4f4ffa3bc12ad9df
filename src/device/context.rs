//! Shared device context
//!
//! Wraps the device state behind a single async mutex. Inbound messages,
//! commands and queries all go through it, so records are appended in the
//! order messages arrived.

use crate::store::RecordStore;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use smartdesk_shared::records::{
    sitting_summary, EVENT_SESSION_END, EVENT_SESSION_START, EVENT_SIT_ALERT,
};
use smartdesk_shared::{
    codec, now_ms, validate, CommandSpec, DailySitting, DeviceState, EventRecord, InboundMessage,
    LcdMessageRecord, OccupancyStatus, Outcome, Record, RelayStateRecord, SittingSessionView,
    TelemetrySample, Topics, Transition, ValidationError,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Bounds applied to read-model limits
const HISTORY_LIMIT: (usize, usize) = (10, 2000);
const SIT_ALERT_LIMIT: (usize, usize) = (1, 50);
const SESSION_LIMIT: (usize, usize) = (1, 500);

/// Most recent telemetry plus the reconciled relay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestView {
    pub latest: Option<TelemetrySample>,
    pub relay_state: RelayStateRecord,
}

/// Device state, its store and its topics
pub struct DeviceContext {
    topics: Topics,
    state: Mutex<DeviceState>,
    store: Arc<dyn RecordStore>,
}

impl DeviceContext {
    pub fn new(topics: Topics, store: Arc<dyn RecordStore>, state: DeviceState) -> Self {
        Self {
            topics,
            state: Mutex::new(state),
            store,
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Run blocking store work off the async workers
    async fn with_store<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RecordStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || work(store.as_ref()))
            .await
            .context("store task failed")?
    }

    /// Rebuild relay and occupancy from the store; failures start from scratch
    pub async fn restore(&self) -> Transition {
        let history = self
            .with_store(|store| {
                let latest = store.latest_telemetry().unwrap_or_else(|e| {
                    warn!("[STORE] Failed to read latest telemetry: {:#}", e);
                    None
                });
                let lifecycle = store
                    .latest_event_of(&[EVENT_SESSION_START, EVENT_SESSION_END])
                    .unwrap_or_else(|e| {
                        warn!("[STORE] Failed to read lifecycle events: {:#}", e);
                        None
                    });
                Ok((latest, lifecycle))
            })
            .await;
        let (latest, lifecycle) = history.unwrap_or_else(|e| {
            warn!("[STORE] Failed to read history: {:#}", e);
            (None, None)
        });

        let transition = self
            .state
            .lock()
            .await
            .restore(latest.as_ref(), lifecycle.as_ref());

        match &transition {
            Transition::SessionRecovered { session_id } => {
                info!("[SEAT] Recovered open session {}", session_id)
            }
            _ => info!("[SEAT] No open session, starting away"),
        }
        if let Some(sample) = &latest {
            info!("[RELAY] Seeded from telemetry at {} (relay={})", sample.ts, sample.relay_on as u8);
        }
        transition
    }

    /// Handle one message from the broker
    pub async fn on_inbound_message(&self, topic: &str, payload: &[u8]) -> Option<Outcome> {
        self.on_inbound_message_at(topic, payload, now_ms()).await
    }

    /// Handle one message received at `now`
    ///
    /// Returns `None` when the message was dropped.
    pub async fn on_inbound_message_at(&self, topic: &str, payload: &[u8], now: u64) -> Option<Outcome> {
        let message = match codec::decode(&self.topics, topic, payload, now) {
            Ok(InboundMessage::Unrecognized { topic }) => {
                debug!("[MQTT] Ignoring message on {}", topic);
                return None;
            }
            Ok(message) => message,
            Err(e) => {
                warn!("[MQTT] Dropping message on {}: {}", topic, e);
                return None;
            }
        };

        let mut state = self.state.lock().await;
        let outcome = state.apply(message, now);
        log_transition(&outcome.transition);
        outcome.records.iter().for_each(log_record);

        // Appended before the lock is released so rows keep arrival order
        let records = outcome.records.clone();
        let appended = self
            .with_store(move |store| {
                for record in &records {
                    if let Err(e) = store.append(record) {
                        error!("[STORE] Failed to append record: {:#}", e);
                    }
                }
                Ok(())
            })
            .await;
        drop(state);

        if let Err(e) = appended {
            error!("[STORE] {:#}", e);
        }
        Some(outcome)
    }

    pub fn validate_command(&self, candidate: &str) -> Result<CommandSpec, ValidationError> {
        validate(candidate)
    }

    pub async fn current_relay_state(&self) -> RelayStateRecord {
        self.state.lock().await.current_relay_state()
    }

    pub async fn occupancy_status(&self, now: u64) -> OccupancyStatus {
        self.state.lock().await.occupancy_status(now)
    }

    pub async fn staleness_ms(&self, now: u64) -> Option<u64> {
        self.state.lock().await.staleness_ms(now)
    }

    pub async fn is_stale(&self, now: u64) -> bool {
        self.state.lock().await.is_stale(now)
    }

    /// Append rows produced outside the inbound path, holding the state lock
    pub async fn append_records(&self, records: Vec<Record>) -> Result<()> {
        let _state = self.state.lock().await;
        self.with_store(move |store| {
            for record in &records {
                store.append(record)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn append_lcd_message(&self, message: LcdMessageRecord) -> Result<()> {
        let _state = self.state.lock().await;
        self.with_store(move |store| store.append_lcd_message(&message))
            .await
    }

    // Read models

    /// Latest sample with the relay record; `observed_at` falls back to the sample time
    pub async fn latest(&self) -> Result<LatestView> {
        let latest = self.with_store(|store| store.latest_telemetry()).await?;
        let mut relay_state = self.current_relay_state().await;
        if relay_state.observed_at.is_none() {
            relay_state.observed_at = latest.as_ref().map(|s| s.ts);
        }
        Ok(LatestView { latest, relay_state })
    }

    /// Telemetry newer than `since`, newest first
    pub async fn history(&self, since: u64, limit: usize) -> Result<Vec<TelemetrySample>> {
        let limit = clamp(limit, HISTORY_LIMIT);
        self.with_store(move |store| store.telemetry_since(since, limit))
            .await
    }

    pub async fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.with_store(move |store| store.recent_events(None, limit))
            .await
    }

    pub async fn sit_alerts(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let limit = clamp(limit, SIT_ALERT_LIMIT);
        self.with_store(move |store| store.recent_events(Some(EVENT_SIT_ALERT), limit))
            .await
    }

    pub async fn lcd_latest(&self) -> Result<Option<LcdMessageRecord>> {
        self.with_store(|store| Ok(store.lcd_messages(1)?.pop()))
            .await
    }

    pub async fn lcd_history(&self, limit: usize) -> Result<Vec<LcdMessageRecord>> {
        self.with_store(move |store| store.lcd_messages(limit))
            .await
    }

    /// Closed sessions, most recently ended first, with local wall-clock times
    pub async fn sitting_sessions(&self, limit: usize) -> Result<Vec<SittingSessionView>> {
        let limit = clamp(limit, SESSION_LIMIT);
        let sessions = self.with_store(move |store| store.sessions(limit)).await?;
        Ok(sessions
            .into_iter()
            .map(|session| SittingSessionView::new(session, &Local))
            .collect())
    }

    /// Per-day sitting totals over the last `days` days, by local date
    pub async fn sitting_summary(&self, days: u64, now: u64) -> Result<Vec<DailySitting>> {
        let sessions = self.with_store(|store| store.sessions(usize::MAX)).await?;
        Ok(sitting_summary(&sessions, days, now, &Local))
    }
}

fn clamp(limit: usize, (min, max): (usize, usize)) -> usize {
    limit.clamp(min, max)
}

fn log_transition(transition: &Transition) {
    match transition {
        Transition::SessionStarted { session_id } => {
            info!("[SEAT] Session {} started", session_id)
        }
        Transition::SessionReplaced { previous, session_id } => {
            warn!("[SEAT] Session {} replaced by {} before it ended", previous, session_id)
        }
        Transition::SessionClosed(session) => info!(
            "[SEAT] Session {} closed after {} min",
            session.session_id,
            session.minutes()
        ),
        Transition::SessionDiscarded { reason } => {
            warn!("[SEAT] Session end discarded: {:?}", reason)
        }
        Transition::SessionAdopted { session_id } => {
            info!("[SEAT] Adopted session {} from device snapshot", session_id)
        }
        Transition::SessionRecovered { session_id } => {
            info!("[SEAT] Recovered session {}", session_id)
        }
        Transition::DeviceReportedAway { session_id } => {
            debug!("[SEAT] Device reports seat empty, session {} still open", session_id)
        }
        Transition::Unchanged => {}
    }
}

fn log_record(record: &Record) {
    match record {
        Record::Event(event) if event.event_type.starts_with("RELAY_") => {
            info!("[RELAY] {} {}", event.event_type, event.detail)
        }
        Record::Event(event) if event.event_type == EVENT_SIT_ALERT => {
            warn!("[SEAT] Long sit alert from device")
        }
        Record::Event(event) => debug!("[SEAT] Device event {}", event.event_type),
        Record::Telemetry(sample) => debug!(
            "[MQTT] Telemetry pir={} ldr={} relay={} rssi={}",
            sample.motion as u8, sample.light_level, sample.relay_on as u8, sample.rssi
        ),
        Record::Session(_) => {}
    }
}
