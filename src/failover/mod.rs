//! Active/standby failover for pharmstream
//!
//! Role assignment is configuration-driven, not elected: the instance whose
//! role matches the designated active role subscribes at startup, the other
//! connects but stays passive and probes the active peer's liveness until a
//! sustained failure promotes it.

pub mod forward;
pub mod monitor;
pub mod role;

pub use forward::{HttpPeerDelivery, PeerDelivery};
pub use monitor::{HealthMonitor, HttpLivenessProbe, LivenessProbe, ProbeOutcome};
pub use role::{ConsumerActivator, RoleController, RoleState};
