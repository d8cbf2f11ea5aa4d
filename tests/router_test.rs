//! Router integration tests over the in-memory stores
//!
//! Covers duplicate suppression, idempotent creates across instances,
//! partition-order application, dead-lettering of poison messages, and
//! bounded cache eviction.

use std::sync::Arc;

use pharmstream::dedup::IdempotencyGuard;
use pharmstream::kafka::{DeadLetterRecord, DeadLetterRouter};
use pharmstream::router::{MessageRouter, RouteOutcome, SkipReason};
use pharmstream::test_utils::{envelope, MemStores, RecordingPublisher};

const PRODUCT_TOPIC: &str = "product-events";
const MEMBER_TOPIC: &str = "member-events";

fn add_product_payload(code: &str, name: &str) -> String {
    format!(
        r#"{{"eventType":"ADD_WITH_PHARMA","data":{{"product":{{"code":"{}","name":"{}"}},"pharma":{{"dosage":"1 tablet twice daily"}}}},"source":"webhook"}}"#,
        code, name
    )
}

fn update_product_payload(code: &str, name: &str) -> String {
    format!(
        r#"{{"eventType":"UPDATE_WITH_PHARMA","data":{{"code":"{}","product":{{"name":"{}"}}}},"source":"internal-api"}}"#,
        code, name
    )
}

struct Harness {
    mem: MemStores,
    publisher: Arc<RecordingPublisher>,
    router: MessageRouter,
}

fn harness_with_capacity(capacity: usize) -> Harness {
    let mem = MemStores::new();
    let publisher = Arc::new(RecordingPublisher::new());
    let stores = mem.stores();
    let guard = Arc::new(IdempotencyGuard::new(capacity, Arc::new(stores.clone())));
    let dead_letters = DeadLetterRouter::new(publisher.clone(), "dead-letter-queue", "main");
    let router = MessageRouter::new(guard, stores, dead_letters, "main");

    Harness {
        mem,
        publisher,
        router,
    }
}

fn harness() -> Harness {
    harness_with_capacity(1000)
}

#[tokio::test]
async fn end_to_end_product_create_and_replay() {
    let h = harness();
    let payload = add_product_payload("P100", "Aspirin");

    // First delivery creates exactly one product
    let outcome = h.router.route(&envelope(PRODUCT_TOPIC, 0, 1, "P100", &payload)).await;
    assert_eq!(outcome, RouteOutcome::Processed);

    let products = h.mem.products.all();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].code, "P100");
    assert_eq!(products[0].name, "Aspirin");

    // The identical message at a different offset is a logged skip, not an
    // error, and creates nothing
    let outcome = h.router.route(&envelope(PRODUCT_TOPIC, 0, 2, "P100", &payload)).await;
    assert_eq!(outcome, RouteOutcome::Skipped(SkipReason::AlreadyExists));
    assert_eq!(h.mem.products.all().len(), 1);

    // No dead letters on the happy path
    assert!(h.publisher.published().is_empty());
}

#[tokio::test]
async fn exact_duplicate_delivery_is_suppressed_by_cache() {
    let h = harness();
    let payload = add_product_payload("P200", "Ibuprofen");
    let delivery = envelope(PRODUCT_TOPIC, 1, 7, "P200", &payload);

    assert_eq!(h.router.route(&delivery).await, RouteOutcome::Processed);

    // Same (topic, partition, offset): short-circuited before any store call
    assert_eq!(
        h.router.route(&delivery).await,
        RouteOutcome::Skipped(SkipReason::DuplicateDelivery)
    );
    assert_eq!(h.mem.products.all().len(), 1);
}

#[tokio::test]
async fn idempotent_create_across_instances() {
    // Two harnesses share one store, as two instances share one database
    let mem = MemStores::new();
    let stores = mem.stores();

    let build = |role: &str| {
        let guard = Arc::new(IdempotencyGuard::new(1000, Arc::new(stores.clone())));
        let publisher = Arc::new(RecordingPublisher::new());
        let dead_letters = DeadLetterRouter::new(publisher, "dead-letter-queue", role);
        MessageRouter::new(guard, stores.clone(), dead_letters, role)
    };
    let main_router = build("main");
    let secondary_router = build("secondary");

    let payload = add_product_payload("P300", "Paracetamol");

    // The same logical event lands on both instances during a failover race
    let first = secondary_router.route(&envelope(PRODUCT_TOPIC, 0, 10, "P300", &payload)).await;
    let second = main_router.route(&envelope(PRODUCT_TOPIC, 0, 10, "P300", &payload)).await;

    assert_eq!(first, RouteOutcome::Processed);
    assert_eq!(second, RouteOutcome::Skipped(SkipReason::AlreadyExists));
    assert_eq!(mem.products.all().len(), 1);
}

#[tokio::test]
async fn partition_order_application_yields_sequential_state() {
    let h = harness();

    let deliveries = [
        (1, add_product_payload("P400", "Amoxicillin")),
        (2, update_product_payload("P400", "Amoxicillin 250mg")),
        (3, update_product_payload("P400", "Amoxicillin 500mg")),
    ];

    for (offset, payload) in &deliveries {
        let outcome = h.router.route(&envelope(PRODUCT_TOPIC, 0, *offset, "P400", payload)).await;
        assert_eq!(outcome, RouteOutcome::Processed);
    }

    let products = h.mem.products.all();
    assert_eq!(products.len(), 1);
    // Final state equals applying the events sequentially
    assert_eq!(products[0].name, "Amoxicillin 500mg");
}

#[tokio::test]
async fn out_of_order_update_before_create_is_dead_lettered() {
    let h = harness();

    // The update arrives before the create (cross-partition race): the
    // missing entity is reportable, not silently absorbed
    let outcome = h
        .router
        .route(&envelope(
            PRODUCT_TOPIC,
            0,
            1,
            "P500",
            &update_product_payload("P500", "Cetirizine"),
        ))
        .await;
    assert_eq!(outcome, RouteOutcome::DeadLettered);

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    let record: DeadLetterRecord = serde_json::from_slice(&published[0].payload).unwrap();
    assert!(record.error.contains("P500"));
}

#[tokio::test]
async fn dead_letter_on_poison_message_does_not_block_partition() {
    let h = harness();

    // Poison: update for an entity that does not exist
    let poison = envelope(
        MEMBER_TOPIC,
        0,
        1,
        "ghost",
        r#"{"eventType":"UPDATE","data":{"username":"ghost","member":{"site_name":"Nowhere"}},"source":"webhook"}"#,
    );
    assert_eq!(h.router.route(&poison).await, RouteOutcome::DeadLettered);

    // Exactly one dead letter record with the original topic, key and error
    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "dead-letter-queue");

    let record: DeadLetterRecord = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(record.original_topic, MEMBER_TOPIC);
    assert_eq!(record.original_message.key.as_deref(), Some("ghost"));
    assert!(record.error.contains("ghost"));
    assert_eq!(record.container_role, "main");

    // The next message in the same partition still processes
    let next = envelope(
        MEMBER_TOPIC,
        0,
        2,
        "pharmacy-1",
        r#"{"eventType":"ADD","data":{"username":"pharmacy-1","site_name":"Corner Pharmacy"},"source":"webhook"}"#,
    );
    assert_eq!(h.router.route(&next).await, RouteOutcome::Processed);
    assert_eq!(h.mem.members.all().len(), 1);
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered() {
    let h = harness();

    let garbage = envelope(PRODUCT_TOPIC, 0, 1, "P600", "this is not json");
    assert_eq!(h.router.route(&garbage).await, RouteOutcome::DeadLettered);

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    let record: DeadLetterRecord = serde_json::from_slice(&published[0].payload).unwrap();
    assert_eq!(record.original_message.value, "this is not json");
}

#[tokio::test]
async fn dead_letter_publish_failure_does_not_crash_routing() {
    let h = harness();
    h.publisher.fail_publishes();

    let poison = envelope(PRODUCT_TOPIC, 0, 1, "P700", "not json");
    // Best-effort: outcome is still DeadLettered, nothing propagates
    assert_eq!(h.router.route(&poison).await, RouteOutcome::DeadLettered);
}

#[tokio::test]
async fn unknown_topic_is_skipped_with_warning() {
    let h = harness();

    let outcome = h
        .router
        .route(&envelope("order-events", 0, 1, "O1", r#"{"eventType":"ADD"}"#))
        .await;
    assert_eq!(outcome, RouteOutcome::Skipped(SkipReason::UnknownTopic));
    assert!(h.publisher.published().is_empty());
}

#[tokio::test]
async fn bounded_cache_eviction_keeps_durable_dedup_correct() {
    let h = harness_with_capacity(5);

    // More distinct messages than the cache holds
    for offset in 0..20 {
        let code = format!("P{:03}", offset);
        let payload = add_product_payload(&code, "Generic");
        let outcome = h.router.route(&envelope(PRODUCT_TOPIC, 0, offset, &code, &payload)).await;
        assert_eq!(outcome, RouteOutcome::Processed);
    }

    // Cache stayed bounded while all 20 products were created
    assert_eq!(h.router.guard().len(), 5);
    assert_eq!(h.mem.products.all().len(), 20);

    // The first delivery was evicted from the cache, but redelivering its
    // event at a new offset still skips through the durable check
    let replay = envelope(PRODUCT_TOPIC, 0, 99, "P000", &add_product_payload("P000", "Generic"));
    assert_eq!(
        h.router.route(&replay).await,
        RouteOutcome::Skipped(SkipReason::AlreadyExists)
    );
    assert_eq!(h.mem.products.all().len(), 20);
}

#[tokio::test]
async fn member_lifecycle_roundtrip() {
    let h = harness();

    let add = envelope(
        MEMBER_TOPIC,
        0,
        1,
        "pharmacy-9",
        r#"{"eventType":"ADD","data":{"username":"pharmacy-9","site_name":"North Pharmacy","license":"PH-900"},"source":"internal-api"}"#,
    );
    assert_eq!(h.router.route(&add).await, RouteOutcome::Processed);

    let update = envelope(
        MEMBER_TOPIC,
        0,
        2,
        "pharmacy-9",
        r#"{"eventType":"UPDATE","data":{"username":"pharmacy-9","member":{"province":"Chiang Mai"}},"source":"internal-api"}"#,
    );
    assert_eq!(h.router.route(&update).await, RouteOutcome::Processed);

    let members = h.mem.members.all();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].site_name, "North Pharmacy");
    assert_eq!(members[0].province.as_deref(), Some("Chiang Mai"));

    let delete = envelope(
        MEMBER_TOPIC,
        0,
        3,
        "pharmacy-9",
        r#"{"eventType":"DELETE","data":{"username":"pharmacy-9"},"source":"internal-api"}"#,
    );
    assert_eq!(h.router.route(&delete).await, RouteOutcome::Processed);
    assert!(h.mem.members.all().is_empty());
}

#[tokio::test]
async fn prescription_log_is_append_once() {
    let h = harness();

    let payload = r#"{"eventType":"ADD","data":{"dispense_ref":"D-2026-0001","member_username":"pharmacy-1","product_code":"P100","quantity":2.0},"source":"internal-api"}"#;

    let first = h.router.route(&envelope("prescription-events", 0, 1, "D-2026-0001", payload)).await;
    assert_eq!(first, RouteOutcome::Processed);

    // Redelivery at a different offset is a skip through the dispense ref
    let second = h.router.route(&envelope("prescription-events", 0, 5, "D-2026-0001", payload)).await;
    assert_eq!(second, RouteOutcome::Skipped(SkipReason::AlreadyExists));
    assert_eq!(h.mem.prescriptions.all().len(), 1);
}

#[tokio::test]
async fn pharma_upsert_converges_on_replay() {
    let h = harness();

    let payload = r#"{"eventType":"UPSERT","data":{"product_code":"P100","pharma":{"dosage":"2 tablets daily","warnings":"Drowsiness"}},"source":"internal-api"}"#;

    assert_eq!(
        h.router.route(&envelope("pharma-events", 0, 1, "P100", payload)).await,
        RouteOutcome::Processed
    );
    // Replay at a new offset is harmless: the upsert converges
    assert_eq!(
        h.router.route(&envelope("pharma-events", 0, 2, "P100", payload)).await,
        RouteOutcome::Processed
    );

    use pharmstream::db::PharmaRepository;
    assert!(h.mem.pharma.exists("P100").await.unwrap());
}

#[tokio::test]
async fn stock_update_for_unknown_product_is_dead_lettered() {
    let h = harness();

    let payload = r#"{"eventType":"STOCK_UPDATE","data":{"code":"P999","stock":12.0},"source":"webhook"}"#;
    let outcome = h.router.route(&envelope(PRODUCT_TOPIC, 0, 1, "P999", payload)).await;
    assert_eq!(outcome, RouteOutcome::DeadLettered);

    let record: DeadLetterRecord =
        serde_json::from_slice(&h.publisher.published()[0].payload).unwrap();
    assert!(record.error.contains("P999"));
}
