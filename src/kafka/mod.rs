//! Kafka integration module for pharmstream
//!
//! This module provides:
//! - Broker client with bounded-backoff connection and role-aware tuning
//! - Event consumer with manual offset management
//! - Dead-letter routing for failed messages
//! - Graceful shutdown with offset commits

pub mod client;
pub mod config;
pub mod consumer;
pub mod dlq;

pub use client::BrokerClient;
pub use consumer::EventConsumer;
pub use dlq::DeadLetterRouter;

use std::collections::HashMap;

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

/// Kafka-specific error types
#[derive(Debug, Error)]
pub enum KafkaIntegrationError {
    #[error("Kafka connection error: {0}")]
    ConnectionError(#[from] KafkaError),

    #[error("Offset commit failed: {0}")]
    OffsetCommitError(String),
}

impl From<KafkaIntegrationError> for crate::error::Error {
    fn from(err: KafkaIntegrationError) -> Self {
        crate::error::Error::kafka(err.to_string())
    }
}

/// Anything that can publish a message to a topic
///
/// The broker client implements this for production; tests substitute an
/// in-memory recorder so dead-letter behavior is observable without a broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish a payload, returning the (partition, offset) it landed on
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        key: Option<&str>,
    ) -> Result<(i32, i64)>;
}

/// A delivered message as handed to the router
///
/// Identity for duplicate suppression is `(topic, partition, offset)`; the
/// key is the entity natural key chosen by producers so one entity's events
/// share a partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    /// Raw JSON payload text; parsed per-topic by the router
    pub payload: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MessageEnvelope {
    /// Dedup identity of this delivery
    pub fn message_id(&self) -> String {
        format!("{}-{}-{}", self.topic, self.partition, self.offset)
    }

    /// Build an envelope from a delivered broker message
    pub fn from_borrowed(message: &BorrowedMessage<'_>) -> Self {
        let headers = message
            .headers()
            .map(|hs| {
                hs.iter()
                    .filter_map(|h| {
                        h.value.map(|v| {
                            (h.key.to_string(), String::from_utf8_lossy(v).into_owned())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message
                .payload()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            headers,
        }
    }
}

/// The original message captured in a dead letter record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterOriginal {
    pub key: Option<String>,
    pub value: String,
    pub offset: i64,
    pub partition: i32,
}

/// Record published to the dead-letter topic on unrecoverable handler failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Topic the message was consumed from
    pub original_topic: String,

    /// The message that failed processing
    pub original_message: DeadLetterOriginal,

    /// Error description
    pub error: String,

    /// When the failure occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Role of the instance that produced the record
    pub container_role: String,
}

impl DeadLetterRecord {
    /// Build a record from the failed envelope and its error
    pub fn from_envelope(envelope: &MessageEnvelope, error: &str, role: &str) -> Self {
        Self {
            original_topic: envelope.topic.clone(),
            original_message: DeadLetterOriginal {
                key: envelope.key.clone(),
                value: envelope.payload.clone(),
                offset: envelope.offset,
                partition: envelope.partition,
            },
            error: error.to_string(),
            timestamp: chrono::Utc::now(),
            container_role: role.to_string(),
        }
    }
}
