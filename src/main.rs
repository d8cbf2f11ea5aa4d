//! pharmstream - active/standby event-consumption backend
//!
//! Wires the broker client, domain stores, idempotency guard, message
//! router, and role controller together, then serves the operational HTTP
//! surface. The designated active instance subscribes immediately; the
//! standby starts the health monitor instead and only subscribes on
//! failover.

use std::sync::Arc;

use tokio::sync::watch;

use pharmstream::api::{self, AppState};
use pharmstream::config::{Config, DeliveryMode};
use pharmstream::db::{self, Stores};
use pharmstream::dedup::IdempotencyGuard;
use pharmstream::error::Result;
use pharmstream::failover::{
    ConsumerActivator, HealthMonitor, HttpLivenessProbe, HttpPeerDelivery, RoleController,
};
use pharmstream::kafka::{BrokerClient, DeadLetterRouter, EventConsumer};
use pharmstream::logging;
use pharmstream::router::MessageRouter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration from environment
    let config = Arc::new(Config::from_env()?);
    config.validate()?;

    // Initialize logging/tracing
    logging::init_tracing(&config.server.log_level, &config.server.environment)?;
    config.log_config();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %config.failover.container_role,
        "Starting pharmstream"
    );

    // Database pool, migrations, and domain stores
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| pharmstream::Error::database(format!("Migration failed: {}", e)))?;
    let retry = db::RetryConfig::new(config.processing.max_retries)
        .with_initial_backoff(config.processing.retry_base_ms)
        .with_max_backoff(config.processing.retry_max_ms);
    let stores = Stores::postgres_with_retry(pool.clone(), retry);

    // Broker sessions; exhausted connect retries are fatal
    let container_role = config.failover.container_role.clone();
    let is_active = config.failover.is_designated_active();
    let broker = Arc::new(BrokerClient::new(&config.kafka, &container_role, is_active)?);
    broker.connect().await?;

    // Idempotency guard over the cache and the durable store checks
    let guard = Arc::new(IdempotencyGuard::new(
        config.failover.dedup_cache_capacity,
        Arc::new(stores.clone()),
    ));

    // Message router with dead-letter fallout
    let dead_letters = DeadLetterRouter::new(
        broker.clone(),
        config.kafka.dlq_topic.clone(),
        container_role.clone(),
    );
    let mut router = MessageRouter::new(guard, stores, dead_letters, container_role.clone());

    if config.failover.delivery()? == DeliveryMode::ForwardWithFallback {
        let peer = HttpPeerDelivery::new(
            &config.failover.peer_base_url,
            container_role.clone(),
            config.server.request_timeout(),
        )?;
        router = router.with_peer_delivery(Arc::new(peer));
    }
    let router = Arc::new(router);

    // Consumer and role controller; the controller owns the subscribe
    // transition
    let consumer = Arc::new(EventConsumer::new(
        broker.clone(),
        router.clone(),
        config.kafka.clone(),
        config.server.shutdown_timeout(),
    ));
    let role = Arc::new(RoleController::new(
        container_role.clone(),
        is_active,
        consumer.clone(),
    ));
    role.start().await?;

    // The standby probes the active peer until promotion or shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut monitor_task = None;
    if !is_active {
        let probe = HttpLivenessProbe::new(
            &config.failover.peer_base_url,
            config.failover.health_timeout(),
        )?;
        let monitor = HealthMonitor::new(
            Arc::new(probe),
            role.clone(),
            config.failover.health_interval(),
            config.failover.failure_threshold,
        );
        monitor_task = Some(tokio::spawn(monitor.run(shutdown_rx)));
    }

    // Operational HTTP surface; blocks until CTRL+C / SIGTERM
    let state = AppState {
        config: config.clone(),
        pool,
        role: role.clone(),
        router,
    };
    api::create_server(state).await?;

    // Graceful drain: stop the monitor, finish in-flight handling, commit,
    // disconnect
    let _ = shutdown_tx.send(true);
    if let Some(task) = monitor_task {
        let _ = task.await;
    }
    if role.state().await.is_consuming() {
        consumer.deactivate().await?;
    }
    broker.disconnect();

    tracing::info!("pharmstream shutdown complete");
    Ok(())
}
