//! Health monitor for the standby instance
//!
//! On a fixed interval the standby probes the active peer's liveness
//! endpoint with a bounded timeout. A success resets the consecutive
//! failure counter; once the counter reaches the threshold the monitor
//! asks the role controller to promote — exactly once. The timer stops
//! after promotion so repeated failures against the dead peer cannot
//! trigger a second subscription.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::role::RoleController;

/// Result of one liveness probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Peer answered healthy
    Healthy,
    /// Peer failed to answer or answered unhealthy, with reason
    Unhealthy(String),
}

/// One liveness probe against the active peer
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}

/// Minimal shape of the peer's health response
#[derive(Debug, Deserialize)]
struct LivenessBody {
    success: bool,
}

/// HTTP GET probe of the peer's `/health` endpoint
///
/// Any non-200 status, connection error, or timeout counts as a failure.
pub struct HttpLivenessProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpLivenessProbe {
    /// Build a probe against a peer base URL with a bounded timeout
    pub fn new(peer_base_url: &str, timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::error::Error::internal(format!("Probe client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/health", peer_base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn probe(&self) -> ProbeOutcome {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<LivenessBody>().await {
                    Ok(body) if body.success => ProbeOutcome::Healthy,
                    Ok(_) => ProbeOutcome::Unhealthy("peer reported unhealthy".to_string()),
                    Err(e) => ProbeOutcome::Unhealthy(format!("invalid health body: {}", e)),
                }
            },
            Ok(response) => ProbeOutcome::Unhealthy(format!("status {}", response.status())),
            Err(e) => ProbeOutcome::Unhealthy(e.to_string()),
        }
    }
}

/// Periodic peer probing with threshold-triggered promotion
pub struct HealthMonitor {
    probe: Arc<dyn LivenessProbe>,
    role: Arc<RoleController>,
    interval: Duration,
    failure_threshold: u32,
}

impl HealthMonitor {
    /// Create a monitor over a probe and the role controller
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        role: Arc<RoleController>,
        interval: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            probe,
            role,
            interval,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Run the probe loop until promotion completes or shutdown is signalled
    ///
    /// The first tick fires after one full interval; probe calls are bounded
    /// by the probe's own timeout, so a hung peer cannot stall the cadence.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            role = %self.role.container_role(),
            interval_secs = self.interval.as_secs(),
            threshold = self.failure_threshold,
            "Health monitoring of active peer started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() fires immediately; swallow the first tick
        ticker.tick().await;

        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.changed() => {
                    info!("Health monitor stopping on shutdown");
                    return;
                },
            }

            match self.probe.probe().await {
                ProbeOutcome::Healthy => {
                    if failures > 0 {
                        info!(failures, "Active peer recovered, resetting failure count");
                    }
                    failures = 0;
                },
                ProbeOutcome::Unhealthy(reason) => {
                    failures += 1;
                    warn!(
                        failures,
                        threshold = self.failure_threshold,
                        reason = %reason,
                        "Peer health check failed"
                    );

                    if failures >= self.failure_threshold {
                        match self.role.promote().await {
                            Ok(true) => {
                                // Promotion done; stop the timer so no second
                                // promotion attempt can fire
                                warn!("Promotion complete, health monitor stopping");
                                return;
                            },
                            Ok(false) => {
                                info!("Instance already consuming, health monitor stopping");
                                return;
                            },
                            Err(e) => {
                                // Stay in the loop; the next failing probe
                                // retries the activation
                                error!(error = %e, "Promotion failed, will retry");
                            },
                        }
                    }
                },
            }
        }
    }
}
