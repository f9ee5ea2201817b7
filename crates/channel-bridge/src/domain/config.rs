//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings of
//! one bridge process.  The binary fills it from CLI arguments and environment
//! variables; tests build it directly or start from [`BridgeConfig::default`].

use std::time::Duration;

use channel_bridge_core::protocol::messages::DEFAULT_QUEUE_SIZE;
use channel_bridge_core::BridgeIdentity;

/// All runtime configuration for one bridge process.
///
/// # Example
///
/// ```rust
/// use channel_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.identity().topic_name(), "session_local/peer_demo/data_data");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Data channel label.
    pub label: String,

    /// Signalling session the data channel belongs to.
    pub session_id: String,

    /// Remote peer within the session.
    pub peer_id: String,

    /// Optional bus namespace the inbound topic lives under.
    pub namespace: Option<String>,

    /// Explicit client id for the codec.  A random one is drawn when absent.
    pub client_id: Option<u64>,

    /// Inbound subscription queue size.
    pub queue_size: usize,

    /// Keep the `send_data` call handle bound for the bridge's lifetime
    /// instead of resolving the service on every call.
    pub persistent_send: bool,

    /// Wait for a remote endpoint to attach before declaring readiness.
    pub wait_for_recv: bool,

    /// Upper bound on the readiness wait.
    pub wait_timeout: Duration,

    /// Interval between readiness polls.
    pub poll_interval: Duration,

    /// Overrides the liveness monitor's default heartbeat timeout.
    pub heartbeat_timeout: Option<Duration>,

    /// Run a simulated remote endpoint in-process.
    pub demo_peer: bool,
}

impl BridgeConfig {
    /// Identity triple (plus namespace) described by this configuration.
    pub fn identity(&self) -> BridgeIdentity {
        BridgeIdentity {
            session_id: self.session_id.clone(),
            peer_id: self.peer_id.clone(),
            label: self.label.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

impl Default for BridgeConfig {
    /// Returns a configuration suitable for a local demo run.
    ///
    /// | Field             | Default    |
    /// |-------------------|------------|
    /// | label             | `data`     |
    /// | session_id        | `local`    |
    /// | peer_id           | `demo`     |
    /// | queue_size        | 10         |
    /// | persistent_send   | false      |
    /// | wait_for_recv     | true       |
    /// | wait_timeout      | 10 seconds |
    /// | poll_interval     | 100 ms     |
    /// | heartbeat_timeout | none       |
    fn default() -> Self {
        Self {
            label: "data".to_string(),
            session_id: "local".to_string(),
            peer_id: "demo".to_string(),
            namespace: None,
            client_id: None,
            queue_size: DEFAULT_QUEUE_SIZE,
            persistent_send: false,
            wait_for_recv: true,
            wait_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            heartbeat_timeout: None,
            demo_peer: false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
