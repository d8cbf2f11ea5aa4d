//! rdkafka client configuration builders
//!
//! The consumer settings are role-aware: the instance holding the active
//! role runs with tighter session and heartbeat timeouts so the broker
//! notices its death quickly and a takeover is fast, while the standby keeps
//! relaxed timings.

use rdkafka::ClientConfig;

use crate::config::KafkaConfig;

/// Build the consumer configuration for an instance
///
/// Subscription always starts from the current offsets; a newly promoted
/// consumer must not replay the historical backlog.
pub fn consumer_client_config(
    config: &KafkaConfig,
    container_role: &str,
    is_active_role: bool,
) -> ClientConfig {
    let (session_timeout, heartbeat) = if is_active_role {
        (config.session_timeout_active_ms, config.heartbeat_active_ms)
    } else {
        (config.session_timeout_standby_ms, config.heartbeat_standby_ms)
    };

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", format!("pharmstream-{}", container_role))
        .set("group.id", &config.consumer_group)
        .set("enable.auto.commit", "false")
        .set("session.timeout.ms", session_timeout.to_string())
        .set("heartbeat.interval.ms", heartbeat.to_string())
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "latest")
        .set("allow.auto.create.topics", "true");

    client_config
}

/// Build the producer configuration
///
/// One in-flight request with idempotence on: durability and per-partition
/// ordering over publish latency.
pub fn producer_client_config(config: &KafkaConfig, container_role: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("client.id", format!("pharmstream-{}-producer", container_role))
        .set("enable.idempotence", "true")
        .set("acks", "all")
        .set("max.in.flight.requests.per.connection", "1")
        .set("message.timeout.ms", "30000");

    client_config
}
