//! Message routing for pharmstream
//!
//! The router receives every delivered message, suppresses duplicates
//! through the idempotency guard, and dispatches by topic to the domain
//! handlers. Failures never escape: anything a handler cannot recover from
//! is routed to the dead-letter topic and the consumer loop moves on.

pub mod member;
pub mod pharma;
pub mod prescription;
pub mod product;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::db::Stores;
use crate::dedup::{IdempotencyGuard, ProcessedRecord};
use crate::error::Result;
use crate::failover::PeerDelivery;
use crate::kafka::{DeadLetterRecord, DeadLetterRouter, MessageEnvelope};
use crate::models::{DomainEvent, MemberEvent, PharmaEvent, PrescriptionEvent, ProductEvent, Topic};

/// Why a message was skipped instead of processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The exact delivery was already processed by this instance
    DuplicateDelivery,
    /// The entity already exists; create treated as success-no-op
    AlreadyExists,
    /// The topic is not part of the catalogue
    UnknownTopic,
}

/// Terminal result of routing one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOutcome {
    /// The domain handler mutated state
    Processed,
    /// Safe no-op, with the reason
    Skipped(SkipReason),
    /// Handed to the peer instance for processing
    Forwarded,
    /// Handler failed; a dead letter record was produced
    DeadLettered,
}

/// What a domain handler did with an accepted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// State was mutated
    Processed,
    /// Entity already existed; nothing to do
    SkippedExisting,
}

/// Dispatches delivered messages to the domain handlers
pub struct MessageRouter {
    guard: Arc<IdempotencyGuard>,
    stores: Stores,
    dead_letters: DeadLetterRouter,
    peer: Option<Arc<dyn PeerDelivery>>,
    container_role: String,
}

impl MessageRouter {
    /// Create a router that processes everything locally
    pub fn new(
        guard: Arc<IdempotencyGuard>,
        stores: Stores,
        dead_letters: DeadLetterRouter,
        container_role: impl Into<String>,
    ) -> Self {
        Self {
            guard,
            stores,
            dead_letters,
            peer: None,
            container_role: container_role.into(),
        }
    }

    /// Switch to forward-with-fallback delivery through the given peer
    pub fn with_peer_delivery(mut self, peer: Arc<dyn PeerDelivery>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Handle to the idempotency guard, for operational introspection
    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Route one delivered message to its handler
    ///
    /// Never returns an error; the outcome says what happened.
    pub async fn route(&self, envelope: &MessageEnvelope) -> RouteOutcome {
        let message_id = envelope.message_id();

        if !self.guard.should_process(&message_id) {
            info!(
                message_id = %message_id,
                topic = %envelope.topic,
                key = envelope.key.as_deref().unwrap_or(""),
                role = %self.container_role,
                "Message already processed, skipping"
            );
            return RouteOutcome::Skipped(SkipReason::DuplicateDelivery);
        }

        let Some(topic) = Topic::parse(&envelope.topic) else {
            warn!(topic = %envelope.topic, "Unknown topic, skipping message");
            return RouteOutcome::Skipped(SkipReason::UnknownTopic);
        };

        // Forward-with-fallback delivery: local processing only when the
        // peer cannot take the message
        if let Some(peer) = &self.peer {
            match peer.forward(envelope).await {
                Ok(()) => {
                    self.mark_processed(envelope);
                    return RouteOutcome::Forwarded;
                },
                Err(e) => {
                    warn!(
                        error = %e,
                        topic = %envelope.topic,
                        "Forward to peer failed, processing locally"
                    );
                },
            }
        }

        match self.dispatch(topic, envelope).await {
            Ok(HandlerOutcome::Processed) => {
                self.mark_processed(envelope);
                RouteOutcome::Processed
            },
            Ok(HandlerOutcome::SkippedExisting) => {
                self.mark_processed(envelope);
                RouteOutcome::Skipped(SkipReason::AlreadyExists)
            },
            Err(e) => {
                self.dead_letters.route(envelope, &e.to_string()).await;
                RouteOutcome::DeadLettered
            },
        }
    }

    async fn dispatch(&self, topic: Topic, envelope: &MessageEnvelope) -> Result<HandlerOutcome> {
        let message_id = envelope.message_id();
        let key = envelope.key.as_deref().unwrap_or("");

        match topic {
            Topic::Product => {
                let event: DomainEvent<ProductEvent> = serde_json::from_str(&envelope.payload)?;
                info!(
                    message_id = %message_id,
                    event_type = event.event.event_type(),
                    source = event.source_label(),
                    key,
                    role = %self.container_role,
                    "Processing product event"
                );
                product::handle(&self.stores, &self.guard, event.event).await
            },
            Topic::Member => {
                let event: DomainEvent<MemberEvent> = serde_json::from_str(&envelope.payload)?;
                info!(
                    message_id = %message_id,
                    event_type = event.event.event_type(),
                    source = event.source_label(),
                    key,
                    role = %self.container_role,
                    "Processing member event"
                );
                member::handle(&self.stores, &self.guard, event.event).await
            },
            Topic::Prescription => {
                let event: DomainEvent<PrescriptionEvent> =
                    serde_json::from_str(&envelope.payload)?;
                info!(
                    message_id = %message_id,
                    event_type = event.event.event_type(),
                    key,
                    role = %self.container_role,
                    "Processing prescription event"
                );
                prescription::handle(&self.stores, &self.guard, event.event).await
            },
            Topic::Pharma => {
                let event: DomainEvent<PharmaEvent> = serde_json::from_str(&envelope.payload)?;
                info!(
                    message_id = %message_id,
                    event_type = event.event.event_type(),
                    key,
                    role = %self.container_role,
                    "Processing pharma event"
                );
                pharma::handle(&self.stores, event.event).await
            },
            Topic::DeadLetter => {
                self.inspect_dead_letter(envelope);
                Ok(HandlerOutcome::Processed)
            },
        }
    }

    /// Dead letter records are only inspected, never reprocessed
    fn inspect_dead_letter(&self, envelope: &MessageEnvelope) {
        match serde_json::from_str::<DeadLetterRecord>(&envelope.payload) {
            Ok(record) => warn!(
                original_topic = %record.original_topic,
                error = %record.error,
                produced_by = %record.container_role,
                "Dead letter record observed"
            ),
            Err(e) => warn!(error = %e, "Unparseable dead letter record observed"),
        }
    }

    fn mark_processed(&self, envelope: &MessageEnvelope) {
        let record = ProcessedRecord {
            timestamp: Utc::now(),
            topic: envelope.topic.clone(),
            key: envelope.key.clone(),
            event_type: peek_event_type(&envelope.payload),
            role: self.container_role.clone(),
        };
        self.guard.mark_processed(&envelope.message_id(), record);
    }
}

/// Extract the eventType tag without committing to a payload shape
fn peek_event_type(payload: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()?
        .get("eventType")?
        .as_str()
        .map(String::from)
}

/// Map a validator error into the router's validation error
pub(crate) fn validation_error(entity: &str, err: validator::ValidationErrors) -> crate::error::Error {
    crate::error::Error::validation(format!("{}: {}", entity, err))
}
