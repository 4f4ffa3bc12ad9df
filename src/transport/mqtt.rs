//! MQTT link built on rumqttc
//!
//! The event loop task owns the `EventLoop`; reconnection is rumqttc's job.
//! Subscriptions are reissued on every `ConnAck` since the broker may have
//! dropped the session.

use crate::config::MqttConfig;
use crate::device::DeviceContext;
use crate::transport::Publisher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between client handles and the event loop
const REQUEST_CAPACITY: usize = 32;

/// Outbound publisher backed by an `AsyncClient`
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .await
            .with_context(|| format!("Failed to publish on {}", topic))
    }

    fn name(&self) -> &'static str {
        "MQTT"
    }
}

/// Client handle plus the event loop that drives it
pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    reconnect_delay: Duration,
}

impl MqttLink {
    /// Build the client; nothing touches the network until `run` polls
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(config.client_id(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        Self {
            client,
            eventloop,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher::new(self.client.clone())
    }

    /// Poll forever, feeding inbound publishes to the device context
    pub async fn run(mut self, context: Arc<DeviceContext>) {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("[MQTT] {} ({} bytes)", publish.topic, publish.payload.len());
                    context
                        .on_inbound_message(&publish.topic, &publish.payload)
                        .await;
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected");
                    for topic in context.topics().inbound() {
                        match self.client.subscribe(topic, QoS::AtMostOnce).await {
                            Ok(()) => info!("[MQTT] Subscribed {}", topic),
                            Err(e) => error!("[MQTT] Subscribe {} failed: {}", topic, e),
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("[MQTT] Broker sent disconnect");
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {}", e);
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}
