//! Operator console on stdin
//!
//! Plain lines are candidate commands. Lines starting with `?` are queries
//! answered with JSON:
//!
//! ```text
//! ?status | ?latest | ?history [minutes] [limit] | ?events
//! ?alerts [limit] | ?lcd | ?lcd-history | ?sessions [limit] | ?summary [days]
//! ```

use crate::command::{CommandDispatcher, DispatchResult};
use crate::device::DeviceContext;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use smartdesk_shared::{now_ms, OccupancyStatus, RelayStateRecord};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 200;
const DEFAULT_EVENT_LIMIT: usize = 100;
const DEFAULT_ALERT_LIMIT: usize = 10;
const DEFAULT_LCD_LIMIT: usize = 50;
const DEFAULT_SESSION_LIMIT: usize = 100;
const DEFAULT_SUMMARY_DAYS: u64 = 7;

/// A read-only console request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Status,
    Latest,
    History { minutes: Option<u64>, limit: usize },
    Events,
    SitAlerts { limit: usize },
    LcdLatest,
    LcdHistory,
    Sessions { limit: usize },
    Summary { days: u64 },
}

impl Query {
    /// Parse the text after `?`
    pub fn parse(text: &str) -> Result<Self> {
        let mut words = text.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("empty query"))?;
        let args: Vec<&str> = words.collect();
        let arg = |i: usize| -> Result<Option<u64>> {
            args.get(i)
                .map(|a| a.parse::<u64>().with_context(|| format!("bad number {:?}", a)))
                .transpose()
        };

        let query = match name {
            "status" => Query::Status,
            "latest" => Query::Latest,
            "history" => Query::History {
                minutes: arg(0)?.map(|m| m.max(1)),
                limit: arg(1)?.map_or(DEFAULT_HISTORY_LIMIT, |n| n as usize),
            },
            "events" => Query::Events,
            "alerts" => Query::SitAlerts {
                limit: arg(0)?.map_or(DEFAULT_ALERT_LIMIT, |n| n as usize),
            },
            "lcd" => Query::LcdLatest,
            "lcd-history" => Query::LcdHistory,
            "sessions" => Query::Sessions {
                limit: arg(0)?.map_or(DEFAULT_SESSION_LIMIT, |n| n as usize),
            },
            "summary" => Query::Summary {
                days: arg(0)?.unwrap_or(DEFAULT_SUMMARY_DAYS),
            },
            other => bail!("unknown query {:?}", other),
        };
        Ok(query)
    }
}

/// Occupancy, relay and connectivity at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubStatus {
    pub occupancy: OccupancyStatus,
    pub relay: RelayStateRecord,
    pub staleness_ms: Option<u64>,
    pub stale: bool,
}

impl HubStatus {
    pub async fn capture(context: &DeviceContext, now: u64) -> Self {
        Self {
            occupancy: context.occupancy_status(now).await,
            relay: context.current_relay_state().await,
            staleness_ms: context.staleness_ms(now).await,
            stale: context.is_stale(now).await,
        }
    }
}

/// Answer a query as pretty JSON
pub async fn answer(context: &DeviceContext, query: &Query, now: u64) -> Result<String> {
    let value = match query {
        Query::Status => serde_json::to_value(HubStatus::capture(context, now).await)?,
        Query::Latest => serde_json::to_value(context.latest().await?)?,
        Query::History { minutes, limit } => {
            let since = minutes.map_or(0, |m| now.saturating_sub(m.saturating_mul(60_000)));
            serde_json::to_value(context.history(since, *limit).await?)?
        }
        Query::Events => serde_json::to_value(context.recent_events(DEFAULT_EVENT_LIMIT).await?)?,
        Query::SitAlerts { limit } => serde_json::to_value(context.sit_alerts(*limit).await?)?,
        Query::LcdLatest => serde_json::to_value(context.lcd_latest().await?)?,
        Query::LcdHistory => serde_json::to_value(context.lcd_history(DEFAULT_LCD_LIMIT).await?)?,
        Query::Sessions { limit } => serde_json::to_value(context.sitting_sessions(*limit).await?)?,
        Query::Summary { days } => serde_json::to_value(context.sitting_summary(*days, now).await?)?,
    };
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Read commands and queries from stdin until it closes
pub async fn run(dispatcher: Arc<CommandDispatcher>, context: Arc<DeviceContext>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("[CMD] Console ready, enter a command (RELAY:ON, LCD:STANDBY:a|b) or ?status");

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(text) = line.strip_prefix('?') {
            let reply = match Query::parse(text) {
                Ok(query) => answer(&context, &query, now_ms()).await,
                Err(e) => Err(e),
            };
            match reply {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("[CMD] Query failed: {:#}", e),
            }
            continue;
        }

        match dispatcher.send(line, "console").await {
            DispatchResult::Sent(outcome) => {
                if let Some(retained) = outcome.retained_topic {
                    info!("[CMD] Standby message retained on {}", retained);
                }
            }
            DispatchResult::Rejected(e) => warn!("[CMD] {}", e),
            DispatchResult::Failed { command, message } => {
                error!("[CMD] {} not sent: {}", command, message)
            }
        }
    }

    info!("[CMD] Console closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use smartdesk_shared::{DeviceState, Topics};

    #[test]
    fn test_parse_queries() {
        assert_eq!(Query::parse("status").unwrap(), Query::Status);
        assert_eq!(
            Query::parse("history").unwrap(),
            Query::History { minutes: None, limit: 200 }
        );
        assert_eq!(
            Query::parse(" history 0 50 ").unwrap(),
            Query::History { minutes: Some(1), limit: 50 }
        );
        assert_eq!(Query::parse("summary").unwrap(), Query::Summary { days: 7 });
        assert_eq!(Query::parse("alerts 3").unwrap(), Query::SitAlerts { limit: 3 });
        assert!(Query::parse("sessions many").is_err());
        assert!(Query::parse("reboot").is_err());
        assert!(Query::parse("").is_err());
    }

    #[tokio::test]
    async fn test_answer_status() {
        let context = DeviceContext::new(
            Topics::for_device("desk"),
            Arc::new(MemoryStore::new()),
            DeviceState::new(),
        );
        context
            .on_inbound_message_at("smartdesk/desk/telemetry", br#"{"relay":1}"#, 1_000)
            .await;

        let json = answer(&context, &Query::Status, 2_000).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["relay"]["value"], serde_json::json!(true));
        assert_eq!(value["staleness_ms"], serde_json::json!(1_000));
        assert_eq!(value["stale"], serde_json::json!(false));
        assert_eq!(value["occupancy"]["seated"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn test_answer_empty_lcd() {
        let context = DeviceContext::new(
            Topics::for_device("desk"),
            Arc::new(MemoryStore::new()),
            DeviceState::new(),
        );
        let json = answer(&context, &Query::LcdLatest, 0).await.unwrap();
        assert_eq!(json, "null");
    }

    #[tokio::test]
    async fn test_history_with_huge_window() {
        let context = DeviceContext::new(
            Topics::for_device("desk"),
            Arc::new(MemoryStore::new()),
            DeviceState::new(),
        );
        context
            .on_inbound_message_at("smartdesk/desk/telemetry", br#"{"pir":1}"#, 1_000)
            .await;

        let query = Query::parse("history 18446744073709551615 10").unwrap();
        assert_eq!(query, Query::History { minutes: Some(u64::MAX), limit: 10 });
        let json = answer(&context, &query, 2_000).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["ts"], serde_json::json!(1_000));
    }

    #[tokio::test]
    async fn test_answer_sessions_with_times() {
        let context = DeviceContext::new(
            Topics::for_device("desk"),
            Arc::new(MemoryStore::new()),
            DeviceState::new(),
        );
        context
            .on_inbound_message_at(
                "smartdesk/desk/telemetry",
                br#"{"type":"session_start","session_id":1}"#,
                910_000,
            )
            .await;
        context
            .on_inbound_message_at(
                "smartdesk/desk/telemetry",
                br#"{"type":"session_end","session_id":1,"duration_ms":90000}"#,
                1_000_000,
            )
            .await;

        let json = answer(&context, &Query::Sessions { limit: 10 }, 1_000_000).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["duration_ms"], serde_json::json!(90_000));
        assert_eq!(value[0]["minutes"], serde_json::json!(1.5));
        assert!(value[0]["start_time"].is_string());
        assert!(value[0]["end_time"].is_string());
    }
}
