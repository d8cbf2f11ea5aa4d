//! Forward-to-peer delivery strategy
//!
//! One deployment variant lets an instance hand accepted messages to its
//! peer's internal HTTP endpoint instead of processing them locally. The
//! strategy sits behind a trait so the router's failover behavior is
//! testable independent of the transport: forward, and fall back to local
//! processing when the forward fails.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::kafka::MessageEnvelope;

/// Header marking a request as instance-to-instance traffic
pub const INTERNAL_REQUEST_HEADER: &str = "x-internal-request";

/// Header carrying the sending instance's role
pub const SOURCE_CONTAINER_HEADER: &str = "x-source-container";

/// Hands an accepted message to the peer instance for processing
#[async_trait]
pub trait PeerDelivery: Send + Sync {
    /// Deliver the envelope to the peer; any error means "process locally"
    async fn forward(&self, envelope: &MessageEnvelope) -> Result<()>;
}

/// HTTP implementation posting to the peer's internal events endpoint
pub struct HttpPeerDelivery {
    client: reqwest::Client,
    url: String,
    container_role: String,
}

impl HttpPeerDelivery {
    /// Build a forwarder against a peer base URL
    pub fn new(
        peer_base_url: &str,
        container_role: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("Forward client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/internal/events", peer_base_url.trim_end_matches('/')),
            container_role: container_role.into(),
        })
    }
}

#[async_trait]
impl PeerDelivery for HttpPeerDelivery {
    async fn forward(&self, envelope: &MessageEnvelope) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(INTERNAL_REQUEST_HEADER, "true")
            .header(SOURCE_CONTAINER_HEADER, &self.container_role)
            .json(envelope)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "Peer rejected forwarded message: status {}",
                response.status()
            )));
        }

        info!(
            topic = %envelope.topic,
            offset = envelope.offset,
            "Message forwarded to peer"
        );

        Ok(())
    }
}
