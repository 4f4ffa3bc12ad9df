mod command;
mod config;
mod console;
mod device;
mod store;
mod transport;

use anyhow::Context;
use command::CommandDispatcher;
use config::{HubConfig, StoreConfig};
use console::HubStatus;
use device::DeviceContext;
use smartdesk_shared::{now_ms, DeviceState, Topics};
use std::sync::Arc;
use std::time::Duration;
use store::{MemoryStore, RecordStore, SqliteStore};
use transport::MqttLink;

use tracing::{error, info, warn};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = HubConfig::load_or_default();
    init_tracing(&config.logging.level);
    source.log();
    config.log_summary();

    let store = open_store(&config.store)?;
    let state = DeviceState::with_thresholds(
        config.thresholds.stale_after_ms,
        config.thresholds.long_sit_minutes,
    );
    let context = Arc::new(DeviceContext::new(
        Topics::for_device(&config.device.id),
        store,
        state,
    ));
    context.restore().await;

    let link = MqttLink::new(&config.mqtt);
    let dispatcher = Arc::new(CommandDispatcher::new(
        context.clone(),
        Arc::new(link.publisher()),
    ));
    info!("SmartDesk hub starting for {}", config.device.id);

    // Spawn status ticker
    let context_clone = context.clone();
    let period = Duration::from_secs(config.thresholds.status_interval_secs.max(1));
    tokio::spawn(async move {
        report_status(context_clone, period).await;
    });

    // Spawn operator console
    let dispatcher_clone = dispatcher.clone();
    let context_clone = context.clone();
    tokio::spawn(async move {
        if let Err(e) = console::run(dispatcher_clone, context_clone).await {
            error!("[CMD] Console stopped: {:#}", e);
        }
    });

    tokio::select! {
        _ = link.run(context.clone()) => {
            error!("[MQTT] Event loop exited");
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let default_directive = level.parse::<Directive>().unwrap_or_else(|_| {
        eprintln!("[CONFIG] Invalid log level {:?}, using info", level);
        LevelFilter::INFO.into()
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_directive)
                .from_env_lossy(),
        )
        .init();
}

fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    if config.ephemeral {
        warn!("[STORE] Ephemeral store, history is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = SqliteStore::open(&config.data_dir).context("Failed to open database")?;
    info!(
        "[STORE] Using {}",
        config.data_dir.join(store::sqlite::DATABASE_FILE).display()
    );
    Ok(Arc::new(store))
}

/// Periodically log occupancy, relay and connectivity
async fn report_status(context: Arc<DeviceContext>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let status = HubStatus::capture(&context, now_ms()).await;

        let relay = match status.relay.value {
            Some(true) => "on",
            Some(false) => "off",
            None => "unknown",
        };
        let source = status
            .relay
            .source
            .map_or_else(|| "none".to_string(), |s| s.to_string());

        if status.stale {
            match status.staleness_ms {
                Some(age) => warn!("[MQTT] Device silent for {}s", age / 1000),
                None => warn!("[MQTT] No telemetry received yet"),
            }
        }

        let occupancy = &status.occupancy;
        if occupancy.seated {
            info!(
                "[SEAT] Seated {}min (session {}){} | relay {} ({})",
                occupancy.sit_minutes,
                occupancy.session_id.unwrap_or(0),
                if occupancy.long_sit { " LONG SIT" } else { "" },
                relay,
                source
            );
        } else {
            info!("[SEAT] Away | relay {} ({})", relay, source);
        }
    }
}
