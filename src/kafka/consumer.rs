//! Kafka event consumer with manual offset management
//!
//! One consume loop per instance, driven by the broker client's delivery
//! stream. Handler invocation is awaited inline, so messages of one
//! partition are processed strictly in offset order; that is the only
//! ordering guarantee. The loop never dies on a bad message — terminal
//! failures are already dead-lettered by the router, and every outcome
//! commits the offset so poison messages are not redelivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{BrokerClient, KafkaIntegrationError, MessageEnvelope};
use crate::config::KafkaConfig;
use crate::error::{Error, Result};
use crate::failover::ConsumerActivator;
use crate::router::MessageRouter;

/// Event consumer that processes messages from the subscribed topic set
///
/// Created unsubscribed; the role controller drives [`activate`] when this
/// instance is (or becomes) the active processor.
///
/// [`activate`]: ConsumerActivator::activate
pub struct EventConsumer {
    client: Arc<BrokerClient>,
    router: Arc<MessageRouter>,
    topics: Vec<String>,
    config: KafkaConfig,
    drain_timeout: Duration,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventConsumer {
    /// Create a new event consumer
    pub fn new(
        client: Arc<BrokerClient>,
        router: Arc<MessageRouter>,
        config: KafkaConfig,
        drain_timeout: Duration,
    ) -> Self {
        let topics = config.topics_list();
        Self {
            client,
            router,
            topics,
            config,
            drain_timeout,
            shutdown: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Internal consumption loop
    async fn consume_loop(
        consumer: Arc<StreamConsumer>,
        router: Arc<MessageRouter>,
        config: KafkaConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Result<()> {
        // Track offsets for batched sync commits
        let mut processed_offsets = TopicPartitionList::new();
        let mut messages_since_commit = 0usize;
        let commit_interval = config.commit_interval();
        let mut last_commit = tokio::time::Instant::now();

        let stream = consumer.stream();
        tokio::pin!(stream);

        loop {
            // Check shutdown signal; the in-flight message already finished
            if shutdown.load(Ordering::Relaxed) {
                break;
            }

            // Get next message with timeout for the periodic commit check
            let message_result = tokio::select! {
                msg = stream.next() => msg,
                _ = sleep(Duration::from_secs(1)) => {
                    if messages_since_commit > 0 && last_commit.elapsed() >= commit_interval {
                        consumer
                            .commit(&processed_offsets, rdkafka::consumer::CommitMode::Sync)
                            .map_err(|e| Error::from(KafkaIntegrationError::OffsetCommitError(e.to_string())))?;
                        processed_offsets = TopicPartitionList::new();
                        messages_since_commit = 0;
                        last_commit = tokio::time::Instant::now();
                    }
                    continue;
                }
            };

            let message = match message_result {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    error!(error = %e, "Kafka consumer error");
                    continue;
                },
                None => continue,
            };

            let envelope = MessageEnvelope::from_borrowed(&message);
            let topic = envelope.topic.clone();
            let (partition, offset) = (envelope.partition, envelope.offset);
            drop(message);

            // Awaited inline: strictly sequential per partition
            let outcome = router.route(&envelope).await;
            debug!(
                topic = %topic,
                partition,
                offset,
                outcome = ?outcome,
                "Message routed"
            );

            // Every outcome commits the offset; failures were dead-lettered
            // and must not be redelivered
            processed_offsets
                .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| Error::kafka(format!("Failed to track offset: {}", e)))?;
            messages_since_commit += 1;

            if messages_since_commit >= config.commit_batch_size {
                consumer
                    .commit(&processed_offsets, rdkafka::consumer::CommitMode::Sync)
                    .map_err(|e| Error::from(KafkaIntegrationError::OffsetCommitError(e.to_string())))?;
                processed_offsets = TopicPartitionList::new();
                messages_since_commit = 0;
                last_commit = tokio::time::Instant::now();
            }
        }

        // Final commit before shutdown
        if messages_since_commit > 0 {
            info!(
                pending = messages_since_commit,
                "Committing pending offsets before shutdown"
            );
            consumer
                .commit(&processed_offsets, rdkafka::consumer::CommitMode::Sync)
                .map_err(|e| Error::from(KafkaIntegrationError::OffsetCommitError(e.to_string())))?;
        }

        info!("Kafka consumer loop stopped");
        Ok(())
    }
}

#[async_trait]
impl ConsumerActivator for EventConsumer {
    /// Subscribe to the topic set and start the consume loop
    async fn activate(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            warn!("Consumer already running, ignoring activation");
            return Ok(());
        }

        self.client.subscribe(&self.topics)?;
        self.shutdown.store(false, Ordering::Relaxed);

        let consumer = self.client.consumer();
        let router = Arc::clone(&self.router);
        let config = self.config.clone();
        let shutdown = Arc::clone(&self.shutdown);

        *task = Some(tokio::spawn(async move {
            if let Err(e) = Self::consume_loop(consumer, router, config, shutdown).await {
                error!(error = %e, "Consumer loop terminated with error");
            }
        }));

        info!(topics = ?self.topics, "Event consumption started");
        Ok(())
    }

    /// Stop intake, drain the in-flight handler, and drop the subscription
    async fn deactivate(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            match tokio::time::timeout(self.drain_timeout, handle).await {
                Ok(Ok(())) => {},
                Ok(Err(e)) => error!(error = %e, "Consumer task panicked during drain"),
                Err(_) => {
                    warn!(
                        timeout_secs = self.drain_timeout.as_secs(),
                        "Drain timeout elapsed, consumer task abandoned"
                    );
                },
            }
        }

        self.client.unsubscribe();
        info!("Event consumption stopped");
        Ok(())
    }
}

impl Drop for EventConsumer {
    fn drop(&mut self) {
        // Ensure the loop winds down if the consumer is dropped mid-flight
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
