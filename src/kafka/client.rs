//! Broker client for pharmstream
//!
//! Wraps the rdkafka producer and consumer lifecycle: bounded-backoff
//! connection verification, subscription from current offsets, and the
//! publish primitive with the standard headers every outgoing message
//! carries (producing role, schema version).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{config as kafka_config, KafkaIntegrationError, MessagePublisher};
use crate::config::KafkaConfig;
use crate::error::{Error, Result};

/// Schema version stamped on every published message
const WIRE_VERSION: &str = "1.0";

/// Producer and consumer sessions against the message broker
pub struct BrokerClient {
    consumer: Arc<StreamConsumer>,
    producer: FutureProducer,
    config: KafkaConfig,
    container_role: String,
}

impl BrokerClient {
    /// Create the client sessions; connectivity is verified by [`connect`]
    ///
    /// `is_active_role` picks the session/heartbeat profile: tight timeouts
    /// for the designated active instance, relaxed for the standby.
    pub fn new(
        config: &KafkaConfig,
        container_role: &str,
        is_active_role: bool,
    ) -> Result<Self> {
        let consumer: StreamConsumer =
            kafka_config::consumer_client_config(config, container_role, is_active_role)
                .create()
                .map_err(|e| Error::kafka(format!("Failed to create consumer: {}", e)))?;

        let producer: FutureProducer =
            kafka_config::producer_client_config(config, container_role)
                .create()
                .map_err(|e| Error::kafka(format!("Failed to create producer: {}", e)))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            producer,
            config: config.clone(),
            container_role: container_role.to_string(),
        })
    }

    /// Verify broker connectivity with bounded exponential backoff
    ///
    /// Exhausting the attempts is fatal to the caller; the instance must not
    /// run half-connected.
    pub async fn connect(&self) -> Result<()> {
        let max_retries = self.config.connect_max_retries;
        let mut backoff = self.config.connect_backoff();

        for attempt in 1..=max_retries {
            match self.fetch_metadata().await {
                Ok(()) => {
                    info!(
                        role = %self.container_role,
                        attempt,
                        "Kafka connected"
                    );
                    return Ok(());
                },
                Err(e) => {
                    warn!(
                        role = %self.container_role,
                        attempt,
                        max_retries,
                        error = %e,
                        "Kafka connection attempt failed"
                    );

                    if attempt < max_retries {
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(10));
                    }
                },
            }
        }

        Err(Error::kafka(format!(
            "Broker unreachable after {} attempts",
            max_retries
        )))
    }

    async fn fetch_metadata(&self) -> Result<()> {
        let consumer = Arc::clone(&self.consumer);

        // fetch_metadata is a blocking librdkafka call
        tokio::task::spawn_blocking(move || {
            consumer
                .fetch_metadata(None, Duration::from_secs(5))
                .map(|_| ())
                .map_err(KafkaIntegrationError::from)
        })
        .await
        .map_err(|e| Error::internal(format!("Metadata task failed: {}", e)))?
        .map_err(Error::from)
    }

    /// Subscribe the consumer session to the given topics
    ///
    /// Consumption starts from the current offsets (`auto.offset.reset` is
    /// `latest`), so a newly promoted consumer does not replay the backlog.
    pub fn subscribe(&self, topics: &[String]) -> Result<()> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();

        self.consumer
            .subscribe(&topic_refs)
            .map_err(|e| Error::kafka(format!("Failed to subscribe to topics: {}", e)))?;

        info!(role = %self.container_role, topics = ?topics, "Subscribed to topics");
        Ok(())
    }

    /// Remove all topic subscriptions of the consumer session
    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!(role = %self.container_role, "Unsubscribed from all topics");
    }

    /// Shared handle to the consumer session for the consume loop
    pub fn consumer(&self) -> Arc<StreamConsumer> {
        Arc::clone(&self.consumer)
    }

    /// Flush outstanding produced messages and drop subscriptions
    pub fn disconnect(&self) {
        if let Err(e) = self.producer.flush(Duration::from_secs(10)) {
            error!(error = %e, "Producer flush on disconnect failed");
        }
        self.consumer.unsubscribe();
        info!(role = %self.container_role, "Kafka disconnected");
    }
}

#[async_trait]
impl MessagePublisher for BrokerClient {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        key: Option<&str>,
    ) -> Result<(i32, i64)> {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "source",
                value: Some(self.container_role.as_str()),
            })
            .insert(Header {
                key: "version",
                value: Some(WIRE_VERSION),
            });

        let send_timeout = Duration::from_secs(30);
        let delivery = match key {
            Some(key) => {
                let record = FutureRecord::to(topic).payload(payload).key(key).headers(headers);
                self.producer.send(record, send_timeout).await
            },
            None => {
                let record =
                    FutureRecord::<str, [u8]>::to(topic).payload(payload).headers(headers);
                self.producer.send(record, send_timeout).await
            },
        }
        .map_err(|(e, _)| Error::kafka(format!("Publish to '{}' failed: {}", topic, e)))?;

        info!(
            topic,
            key = key.unwrap_or(""),
            partition = delivery.0,
            offset = delivery.1,
            "Message published"
        );

        Ok((delivery.0, delivery.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envconfig::Envconfig;

    #[tokio::test]
    async fn test_client_creation_without_broker() {
        // Creating sessions is lazy; only connect() talks to the broker
        let config = KafkaConfig::init_from_hashmap(&std::collections::HashMap::new()).unwrap();
        let client = BrokerClient::new(&config, "main", false);
        assert!(client.is_ok());
    }
}
