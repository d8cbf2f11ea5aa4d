//! Failover integration tests
//!
//! Drives the health monitor and role controller with scripted probes and a
//! counting activator: promotion within the threshold window, counter reset
//! on recovery, exactly-once activation, and the forward-with-fallback
//! delivery strategy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use pharmstream::dedup::IdempotencyGuard;
use pharmstream::error::{Error, Result};
use pharmstream::failover::{
    ConsumerActivator, HealthMonitor, LivenessProbe, PeerDelivery, ProbeOutcome, RoleController,
    RoleState,
};
use pharmstream::kafka::{DeadLetterRouter, MessageEnvelope};
use pharmstream::router::{MessageRouter, RouteOutcome};
use pharmstream::test_utils::{envelope, MemStores, RecordingPublisher};

/// Counts subscribe/unsubscribe transitions
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

/// Replays a scripted sequence of probe outcomes, then repeats the last one
struct ScriptedProbe {
    outcomes: Mutex<VecDeque<ProbeOutcome>>,
    fallback: ProbeOutcome,
    calls: AtomicU32,
}

impl ScriptedProbe {
    fn new(outcomes: Vec<ProbeOutcome>, fallback: ProbeOutcome) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback,
            calls: AtomicU32::new(0),
        }
    }

    fn down() -> Self {
        Self::new(Vec::new(), ProbeOutcome::Unhealthy("connection refused".to_string()))
    }
}

#[async_trait]
impl LivenessProbe for ScriptedProbe {
    async fn probe(&self) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

const INTERVAL: Duration = Duration::from_millis(25);
const THRESHOLD: u32 = 3;

fn standby_controller() -> (Arc<RoleController>, Arc<CountingActivator>) {
    let activator = Arc::new(CountingActivator::default());
    let controller = Arc::new(RoleController::new("main", false, activator.clone()));
    (controller, activator)
}

#[tokio::test]
async fn standby_promotes_within_threshold_window() {
    let (controller, activator) = standby_controller();
    let probe = Arc::new(ScriptedProbe::down());
    let monitor = HealthMonitor::new(probe, controller.clone(), INTERVAL, THRESHOLD);

    let (_tx, rx) = watch::channel(false);
    let started = Instant::now();
    let task = tokio::spawn(monitor.run(rx));

    // The monitor returns once promotion completes
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("monitor did not finish in time")
        .expect("monitor task panicked");

    // Promoted within threshold * interval plus epsilon
    let elapsed = started.elapsed();
    assert!(
        elapsed < INTERVAL * THRESHOLD + Duration::from_millis(500),
        "promotion took {:?}",
        elapsed
    );

    assert_eq!(controller.state().await, RoleState::StandbyPromoted);
    assert_eq!(activator.activations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn probe_success_resets_the_failure_counter() {
    let (controller, activator) = standby_controller();

    // Two failures, a recovery, then a sustained outage: only the final
    // streak may promote
    let probe = Arc::new(ScriptedProbe::new(
        vec![
            ProbeOutcome::Unhealthy("timeout".to_string()),
            ProbeOutcome::Unhealthy("timeout".to_string()),
            ProbeOutcome::Healthy,
        ],
        ProbeOutcome::Unhealthy("connection refused".to_string()),
    ));
    let monitor = HealthMonitor::new(probe.clone(), controller.clone(), INTERVAL, THRESHOLD);

    let (_tx, rx) = watch::channel(false);
    tokio::time::timeout(Duration::from_secs(5), tokio::spawn(monitor.run(rx)))
        .await
        .expect("monitor did not finish in time")
        .expect("monitor task panicked");

    // Reset means the streak before the recovery did not count: at least
    // 3 + 3 probes happened before promotion
    assert!(probe.calls.load(Ordering::SeqCst) >= 6);
    assert_eq!(controller.state().await, RoleState::StandbyPromoted);
    assert_eq!(activator.activations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_double_activation_after_promotion() {
    let (controller, activator) = standby_controller();
    let probe = Arc::new(ScriptedProbe::down());
    let monitor = HealthMonitor::new(probe, controller.clone(), INTERVAL, THRESHOLD);

    let (_tx, rx) = watch::channel(false);
    tokio::time::timeout(Duration::from_secs(5), tokio::spawn(monitor.run(rx)))
        .await
        .expect("monitor did not finish in time")
        .expect("monitor task panicked");

    assert_eq!(activator.activations.load(Ordering::SeqCst), 1);

    // The peer is still down; further promotion attempts (from any caller)
    // must not subscribe again
    assert!(!controller.promote().await.unwrap());
    assert!(!controller.promote().await.unwrap());
    assert_eq!(activator.activations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_signal_stops_monitoring_without_promotion() {
    let (controller, activator) = standby_controller();

    // Healthy peer: the monitor would run forever without the signal
    let probe = Arc::new(ScriptedProbe::new(Vec::new(), ProbeOutcome::Healthy));
    let monitor = HealthMonitor::new(probe, controller.clone(), INTERVAL, THRESHOLD);

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(monitor.run(rx));

    tokio::time::sleep(INTERVAL * 2).await;
    tx.send(true).expect("monitor dropped the shutdown receiver");

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("monitor did not stop on shutdown")
        .expect("monitor task panicked");

    assert_eq!(controller.state().await, RoleState::StandbyPassive);
    assert_eq!(activator.activations.load(Ordering::SeqCst), 0);
}

/// Peer delivery stub that can be switched between accepting and failing
struct ScriptedPeer {
    accept: bool,
    forwarded: Mutex<Vec<MessageEnvelope>>,
}

#[async_trait]
impl PeerDelivery for ScriptedPeer {
    async fn forward(&self, envelope: &MessageEnvelope) -> Result<()> {
        if !self.accept {
            return Err(Error::Http("peer unreachable".to_string()));
        }
        self.forwarded.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

fn forwarding_router(mem: &MemStores, peer: Arc<ScriptedPeer>) -> MessageRouter {
    let stores = mem.stores();
    let guard = Arc::new(IdempotencyGuard::new(1000, Arc::new(stores.clone())));
    let dead_letters =
        DeadLetterRouter::new(Arc::new(RecordingPublisher::new()), "dead-letter-queue", "main");
    MessageRouter::new(guard, stores, dead_letters, "main").with_peer_delivery(peer)
}

const ADD_PAYLOAD: &str = r#"{"eventType":"ADD_WITH_PHARMA","data":{"product":{"code":"P100","name":"Aspirin"}},"source":"webhook"}"#;

#[tokio::test]
async fn forward_delivery_hands_message_to_peer() {
    let mem = MemStores::new();
    let peer = Arc::new(ScriptedPeer {
        accept: true,
        forwarded: Mutex::new(Vec::new()),
    });
    let router = forwarding_router(&mem, peer.clone());

    let outcome = router.route(&envelope("product-events", 0, 1, "P100", ADD_PAYLOAD)).await;
    assert_eq!(outcome, RouteOutcome::Forwarded);

    // The peer got the message; nothing was processed locally
    assert_eq!(peer.forwarded.lock().unwrap().len(), 1);
    assert!(mem.products.all().is_empty());

    // Forwarded deliveries still count as processed for dedup purposes
    let outcome = router.route(&envelope("product-events", 0, 1, "P100", ADD_PAYLOAD)).await;
    assert_eq!(
        outcome,
        RouteOutcome::Skipped(pharmstream::router::SkipReason::DuplicateDelivery)
    );
}

#[tokio::test]
async fn forward_failure_falls_back_to_local_processing() {
    let mem = MemStores::new();
    let peer = Arc::new(ScriptedPeer {
        accept: false,
        forwarded: Mutex::new(Vec::new()),
    });
    let router = forwarding_router(&mem, peer);

    let outcome = router.route(&envelope("product-events", 0, 1, "P100", ADD_PAYLOAD)).await;
    assert_eq!(outcome, RouteOutcome::Processed);

    // Fallback processed locally
    let products = mem.products.all();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].code, "P100");
}
