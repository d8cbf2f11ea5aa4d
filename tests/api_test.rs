//! HTTP surface integration tests
//!
//! Exercises the liveness contract, role introspection, the internal
//! forwarded-message endpoint, and the operator stand-down signal against
//! an in-memory wiring of the router.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use pharmstream::api::{create_router, AppState, HealthResponse};
use pharmstream::config::{
    Config, DatabaseConfig, FailoverConfig, KafkaConfig, ProcessingConfig, ServerConfig,
};
use pharmstream::db::pool;
use pharmstream::dedup::IdempotencyGuard;
use pharmstream::error::Result;
use pharmstream::failover::{ConsumerActivator, RoleController};
use pharmstream::kafka::DeadLetterRouter;
use pharmstream::router::MessageRouter;
use pharmstream::test_utils::{MemStores, RecordingPublisher};

#[derive(Default)]
struct CountingActivator {
    activations: AtomicU32,
    deactivations: AtomicU32,
}

#[async_trait]
impl ConsumerActivator for CountingActivator {
    async fn activate(&self) -> Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            environment: "test".to_string(),
            request_timeout_secs: 5,
            shutdown_timeout_secs: 5,
        },
        kafka: KafkaConfig {
            brokers: "localhost:9092".to_string(),
            consumer_group: "primary-processors".to_string(),
            topics: "product-events,member-events".to_string(),
            dlq_topic: "dead-letter-queue".to_string(),
            session_timeout_active_ms: 6000,
            session_timeout_standby_ms: 30000,
            heartbeat_active_ms: 1000,
            heartbeat_standby_ms: 3000,
            connect_max_retries: 1,
            connect_backoff_ms: 100,
            commit_batch_size: 100,
            commit_interval_secs: 5,
        },
        database: DatabaseConfig {
            // Nothing listens here; the lazy pool only fails on use
            url: "postgresql://pharmstream@127.0.0.1:9/pharmstream".to_string(),
            pool_max_size: 2,
            pool_min_idle: 0,
            pool_timeout_seconds: 1,
            pool_idle_timeout_seconds: 60,
        },
        failover: FailoverConfig {
            container_role: "main".to_string(),
            active_role: "secondary".to_string(),
            peer_base_url: "http://127.0.0.1:9".to_string(),
            health_interval_secs: 10,
            health_timeout_secs: 5,
            failure_threshold: 3,
            delivery_mode: "local".to_string(),
            dedup_cache_capacity: 1000,
        },
        processing: ProcessingConfig {
            max_retries: 3,
            retry_base_ms: 100,
            retry_max_ms: 10000,
        },
    }
}

struct TestApp {
    state: AppState,
    mem: MemStores,
    activator: Arc<CountingActivator>,
}

fn test_app(designated_active: bool) -> TestApp {
    let config = Arc::new(test_config());
    let mem = MemStores::new();
    let stores = mem.stores();

    let guard = Arc::new(IdempotencyGuard::new(1000, Arc::new(stores.clone())));
    let dead_letters =
        DeadLetterRouter::new(Arc::new(RecordingPublisher::new()), "dead-letter-queue", "main");
    let router = Arc::new(MessageRouter::new(guard, stores, dead_letters, "main"));

    let activator = Arc::new(CountingActivator::default());
    let role = Arc::new(RoleController::new("main", designated_active, activator.clone()));

    let db_pool = pool::create_lazy_pool(&config.database).expect("lazy pool");

    TestApp {
        state: AppState {
            config,
            pool: db_pool,
            role,
            router,
        },
        mem,
        activator,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_answers_200_with_liveness_contract() {
    let app = create_router(test_app(false).state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(health.success);
    assert_eq!(health.container, "main");
    // Database is unreachable in this wiring; informational only
    assert_eq!(health.services.get("database").map(String::as_str), Some("error"));
    assert_eq!(health.services.get("consumer").map(String::as_str), Some("standby"));
}

#[tokio::test]
async fn role_endpoint_reports_state() {
    let app = create_router(test_app(false).state);

    let response = app
        .oneshot(Request::builder().uri("/role").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["state"], "standby_passive");
    assert_eq!(json["consuming"], false);
}

#[tokio::test]
async fn internal_endpoint_rejects_external_requests() {
    let app = create_router(test_app(false).state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/internal/events")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn internal_endpoint_processes_forwarded_envelope() {
    let test = test_app(false);
    let app = create_router(test.state.clone());

    let envelope = serde_json::json!({
        "topic": "product-events",
        "partition": 0,
        "offset": 1,
        "key": "P100",
        "payload": r#"{"eventType":"ADD_WITH_PHARMA","data":{"product":{"code":"P100","name":"Aspirin"}},"source":"webhook"}"#,
        "headers": {}
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/internal/events")
                .header("content-type", "application/json")
                .header("x-internal-request", "true")
                .header("x-source-container", "secondary")
                .body(Body::from(envelope.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["outcome"], "processed");

    // The forwarded message went through the local router into the store
    assert_eq!(test.mem.products.all().len(), 1);
}

#[tokio::test]
async fn stand_down_requires_a_consuming_instance() {
    let test = test_app(false);
    let app = create_router(test.state.clone());

    // Passive standby: nothing to stand down
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/stand-down")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn stand_down_stops_a_promoted_instance() {
    let test = test_app(false);
    test.state.role.promote().await.unwrap();

    let app = create_router(test.state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/stand-down")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(test.activator.deactivations.load(Ordering::SeqCst), 1);
    assert!(!test.state.role.state().await.is_consuming());
}
