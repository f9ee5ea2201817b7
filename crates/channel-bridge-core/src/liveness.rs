//! Port traits for the liveness (heartbeat bond) monitor.
//!
//! A bond is a bidirectional heartbeat session between the bridge and the
//! process that owns the other end of the data channel.  The bridge only
//! cares about two events:
//!
//! - **formed** – the remote side's heartbeats have been seen.
//! - **broken** – the remote side stopped beating or closed the bond.
//!
//! `broken` fires at most once per monitor lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Error type for liveness monitor operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LivenessError {
    #[error("liveness monitor already started")]
    AlreadyStarted,
    #[error("failed to start liveness monitor: {0}")]
    Start(String),
}

/// Callbacks invoked by a [`LivenessMonitor`].
pub trait LivenessEvents: Send + Sync {
    fn on_formed(&self);
    fn on_broken(&self);
}

/// A heartbeat session scoped to one liveness session id.
#[async_trait]
pub trait LivenessMonitor: Send + Sync {
    /// Starts heartbeating.
    ///
    /// `heartbeat_timeout` overrides the monitor's default timeout when given.
    fn start(
        &mut self,
        events: Arc<dyn LivenessEvents>,
        heartbeat_timeout: Option<Duration>,
    ) -> Result<(), LivenessError>;

    /// `true` between a successful `start` and `stop`.
    fn is_active(&self) -> bool;

    /// Stops heartbeating and releases the session.  Idempotent.
    async fn stop(&mut self);
}

/// Builds monitors for a given liveness session id.
pub trait LivenessFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Box<dyn LivenessMonitor>;
}
