//! Dead-letter routing for failed messages
//!
//! Terminal processing failures end here: the original message plus error
//! context is republished to the dead-letter topic for manual inspection.
//! The publish itself is best-effort — a broker outage on this path is
//! logged and swallowed, never thrown back into the consumer loop.

use std::sync::Arc;

use tracing::{error, info};

use super::{DeadLetterRecord, MessageEnvelope, MessagePublisher};

/// Publishes dead letter records for messages whose handler failed
pub struct DeadLetterRouter {
    publisher: Arc<dyn MessagePublisher>,
    topic: String,
    container_role: String,
}

impl DeadLetterRouter {
    /// Create a new dead-letter router
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        topic: impl Into<String>,
        container_role: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            container_role: container_role.into(),
        }
    }

    /// Route a failed message to the dead-letter topic
    ///
    /// Never returns an error; after this call the message counts as
    /// handled and the consumer loop moves on.
    pub async fn route(&self, envelope: &MessageEnvelope, error_text: &str) {
        error!(
            topic = %envelope.topic,
            key = envelope.key.as_deref().unwrap_or(""),
            offset = envelope.offset,
            error = error_text,
            role = %self.container_role,
            "Message processing failed"
        );

        let record = DeadLetterRecord::from_envelope(envelope, error_text, &self.container_role);

        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize dead letter record");
                return;
            },
        };

        // Key by the source partition and offset so records for one failure
        // collapse onto one partition
        let key = format!("{}-{}", envelope.partition, envelope.offset);

        match self.publisher.publish(&self.topic, &payload, Some(&key)).await {
            Ok((partition, offset)) => {
                info!(
                    topic = %self.topic,
                    partition,
                    offset,
                    "Dead letter record published"
                );
            },
            Err(e) => {
                error!(
                    topic = %self.topic,
                    error = %e,
                    "Failed to publish dead letter record"
                );
            },
        }
    }
}
