//! Publisher abstraction for the outbound side of the broker connection

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Something that can publish a payload on a topic
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `topic`; `retain` asks the broker to keep it for
    /// late subscribers
    async fn publish(&self, topic: &str, payload: Bytes, retain: bool) -> Result<()>;

    /// Human-readable name for this publisher
    fn name(&self) -> &'static str;
}
