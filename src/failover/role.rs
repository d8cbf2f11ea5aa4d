//! Role controller for the active/standby pair
//!
//! Owns the role state of this process instance and the subscribe
//! transition. The designated active instance activates consumption at
//! startup; the standby stays connected but unsubscribed until the health
//! monitor reports sustained failure of the peer and promotes it.
//!
//! There is no automatic failback. Once an instance has been stood down it
//! only re-enters consumption through an explicit operator signal.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;

/// Role state of one process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleState {
    /// Designated active: subscribed and processing since startup
    PrimaryActive,
    /// Standby: connected, not subscribed, probing the peer
    StandbyPassive,
    /// Standby that took over processing via failover
    StandbyPromoted,
}

impl RoleState {
    /// Whether this state consumes messages
    pub fn is_consuming(&self) -> bool {
        matches!(self, RoleState::PrimaryActive | RoleState::StandbyPromoted)
    }
}

/// The subscribe/unsubscribe transition the controller owns
///
/// Implemented by the event consumer in production; tests count invocations
/// to verify promotion happens exactly once.
#[async_trait]
pub trait ConsumerActivator: Send + Sync {
    /// Subscribe to the topic set and start processing
    async fn activate(&self) -> Result<()>;

    /// Stop processing and drop the subscription
    async fn deactivate(&self) -> Result<()>;
}

/// Determines and transitions the role of this instance
pub struct RoleController {
    container_role: String,
    state: Mutex<RoleState>,
    activator: Arc<dyn ConsumerActivator>,
}

impl RoleController {
    /// Create a controller in its configured initial state
    pub fn new(
        container_role: impl Into<String>,
        designated_active: bool,
        activator: Arc<dyn ConsumerActivator>,
    ) -> Self {
        let initial = if designated_active {
            RoleState::PrimaryActive
        } else {
            RoleState::StandbyPassive
        };

        Self {
            container_role: container_role.into(),
            state: Mutex::new(initial),
            activator,
        }
    }

    /// Role identifier of this instance
    pub fn container_role(&self) -> &str {
        &self.container_role
    }

    /// Current role state
    pub async fn state(&self) -> RoleState {
        *self.state.lock().await
    }

    /// Apply the initial state: the designated active instance subscribes
    /// immediately, the standby deliberately does not.
    pub async fn start(&self) -> Result<()> {
        let state = self.state.lock().await;
        match *state {
            RoleState::PrimaryActive => {
                info!(
                    role = %self.container_role,
                    "Starting as PRIMARY processor, subscribing immediately"
                );
                self.activator.activate().await
            },
            RoleState::StandbyPassive => {
                info!(
                    role = %self.container_role,
                    "Starting as STANDBY processor, not consuming unless the peer fails"
                );
                Ok(())
            },
            RoleState::StandbyPromoted => Ok(()),
        }
    }

    /// Promote a passive standby to an active consumer
    ///
    /// Idempotent: returns `Ok(true)` only for the transition that actually
    /// subscribed. Repeated calls after promotion, and calls on the primary,
    /// return `Ok(false)` without touching the subscription. A failed
    /// activation leaves the instance passive so a later attempt can retry.
    pub async fn promote(&self) -> Result<bool> {
        let mut state = self.state.lock().await;

        if state.is_consuming() {
            return Ok(false);
        }

        warn!(
            role = %self.container_role,
            "FAILOVER: peer is down, taking over message processing"
        );

        match self.activator.activate().await {
            Ok(()) => {
                *state = RoleState::StandbyPromoted;
                warn!(
                    role = %self.container_role,
                    "Instance is now ACTIVE (emergency failover)"
                );
                Ok(true)
            },
            Err(e) => {
                error!(
                    role = %self.container_role,
                    error = %e,
                    "Failed to activate emergency failover"
                );
                Err(e)
            },
        }
    }

    /// Stand a consuming instance down on explicit operator signal
    ///
    /// Stops consumption and drops the subscription. The instance does not
    /// resume monitoring or consuming on its own; the operator restarts it
    /// into its configured role once the topology is resolved.
    pub async fn stand_down(&self) -> Result<bool> {
        let mut state = self.state.lock().await;

        if !state.is_consuming() {
            return Ok(false);
        }

        self.activator.deactivate().await?;
        *state = RoleState::StandbyPassive;

        warn!(
            role = %self.container_role,
            "Instance stood down by operator signal; restart to resume its configured role"
        );

        Ok(true)
    }
}
