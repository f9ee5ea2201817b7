//! Data-channel bridge: entry point.
//!
//! This binary relays one peer-to-peer data channel between a pub/sub bus and
//! the remote process that owns the other end of the channel.  Inbound
//! messages on the channel's topic are fed to the protocol codec; the codec's
//! replies go back out through the `send_data` call.  The process exits when
//! the remote endpoint's heartbeat bond breaks, when an outbound call fails,
//! or on Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! channel-bridge --label <LABEL> --session-id <ID> --peer-id <ID> [OPTIONS]
//!
//! Options:
//!   --namespace <NS>             Bus namespace prefix for the inbound topic
//!   --client-id <ID>             Explicit codec client id [default: random]
//!   --queue-size <N>             Inbound queue size [default: 10]
//!   --persistent-send            Bind the send_data handle once
//!   --wait-for-recv <BOOL>       Wait for a remote endpoint [default: true]
//!   --wait-timeout-ms <MS>       Readiness wait bound [default: 10000]
//!   --poll-interval-ms <MS>      Readiness poll interval [default: 100]
//!   --heartbeat-timeout-ms <MS>  Override the heartbeat timeout
//!   --demo-peer                  Run a simulated remote endpoint in-process
//! ```
//!
//! # Environment variable overrides
//!
//! Every option can also be set through `CHANNEL_BRIDGE_<OPTION>` (upper
//! snake case, e.g. `CHANNEL_BRIDGE_SESSION_ID`).  CLI args take precedence
//! when both are present.
//!
//! # Lifecycle
//!
//! ```text
//! parse CLI → build bus (+ demo peer) → Bridge::new
//!   → wait_for_recv (optional; false aborts startup)
//!   → start_liveness
//!   → wait for Ctrl+C or a shutdown request
//!   → teardown
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use channel_bridge::application::{Bridge, BridgeOptions, ProcessShutdown};
use channel_bridge::domain::BridgeConfig;
use channel_bridge::infrastructure::{DemoPeer, HeartbeatConfig, HeartbeatFactory, LocalBus};
use channel_bridge_core::protocol::messages::DEFAULT_QUEUE_SIZE;
use channel_bridge_core::OpCodecFactory;

/// Interval between the demo peer's pings.
const DEMO_PING_INTERVAL: Duration = Duration::from_secs(1);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Relays one peer-to-peer data channel between a pub/sub bus and its remote
/// owner.
#[derive(Debug, Parser)]
#[command(
    name = "channel-bridge",
    about = "Bridge between a peer-to-peer data channel and a pub/sub bus",
    version
)]
struct Cli {
    /// Data channel label.
    #[arg(long, env = "CHANNEL_BRIDGE_LABEL")]
    label: String,

    /// Signalling session the data channel belongs to.
    #[arg(long, env = "CHANNEL_BRIDGE_SESSION_ID")]
    session_id: String,

    /// Remote peer within the session.
    #[arg(long, env = "CHANNEL_BRIDGE_PEER_ID")]
    peer_id: String,

    /// Namespace the inbound topic lives under.
    #[arg(long, env = "CHANNEL_BRIDGE_NAMESPACE")]
    namespace: Option<String>,

    /// Explicit client id handed to the codec.
    #[arg(long, env = "CHANNEL_BRIDGE_CLIENT_ID")]
    client_id: Option<u64>,

    /// Inbound subscription queue size.
    #[arg(long, default_value_t = DEFAULT_QUEUE_SIZE, env = "CHANNEL_BRIDGE_QUEUE_SIZE")]
    queue_size: usize,

    /// Keep the `send_data` call handle bound for the bridge's lifetime.
    #[arg(long, env = "CHANNEL_BRIDGE_PERSISTENT_SEND")]
    persistent_send: bool,

    /// Wait for a remote endpoint to attach before starting liveness.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "CHANNEL_BRIDGE_WAIT_FOR_RECV"
    )]
    wait_for_recv: bool,

    /// Upper bound on the readiness wait, in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "CHANNEL_BRIDGE_WAIT_TIMEOUT_MS")]
    wait_timeout_ms: u64,

    /// Interval between readiness polls, in milliseconds.
    #[arg(long, default_value_t = 100, env = "CHANNEL_BRIDGE_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Overrides the liveness monitor's heartbeat timeout, in milliseconds.
    #[arg(long, env = "CHANNEL_BRIDGE_HEARTBEAT_TIMEOUT_MS")]
    heartbeat_timeout_ms: Option<u64>,

    /// Run a simulated remote endpoint in-process.
    #[arg(long, env = "CHANNEL_BRIDGE_DEMO_PEER")]
    demo_peer: bool,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the label, session id and peer id do not form a
    /// valid channel identity.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let config = BridgeConfig {
            label: self.label,
            session_id: self.session_id,
            peer_id: self.peer_id,
            namespace: self.namespace,
            client_id: self.client_id,
            queue_size: self.queue_size,
            persistent_send: self.persistent_send,
            wait_for_recv: self.wait_for_recv,
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_timeout: self.heartbeat_timeout_ms.map(Duration::from_millis),
            demo_peer: self.demo_peer,
        };

        config
            .identity()
            .validate()
            .context("invalid data channel identity")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `RUST_LOG` wins; otherwise `info`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    info!(
        "channel bridge starting: {} (topic {})",
        config.identity(),
        config.identity().topic_name()
    );

    let bus = LocalBus::new();
    let shutdown = ProcessShutdown::new();
    let heartbeat = HeartbeatConfig::default();

    // The demo peer advertises `send_data` before the bridge opens its handle.
    let demo = if config.demo_peer {
        let peer = DemoPeer::spawn(&bus, &config.identity(), DEMO_PING_INTERVAL, heartbeat)
            .context("failed to start demo peer")?;
        Some(peer)
    } else {
        None
    };

    let created = Bridge::new(
        BridgeOptions::from_config(&config),
        &bus,
        &OpCodecFactory,
        &HeartbeatFactory::new(bus.clone(), heartbeat),
        Arc::new(shutdown.clone()),
    );
    let bridge = match created {
        Ok(bridge) => bridge,
        Err(e) => {
            if let Some(peer) = demo {
                peer.stop().await;
            }
            return Err(e).context("failed to create bridge");
        }
    };

    let result = drive(&bridge, &config, &shutdown).await;

    bridge.teardown().await;
    if let Some(peer) = demo {
        peer.stop().await;
    }

    info!("channel bridge stopped");
    result
}

/// Runs a constructed bridge until Ctrl+C or a shutdown request.
///
/// Returns an error when startup is aborted or when shutdown was requested
/// for a fatal reason.
async fn drive(
    bridge: &Bridge,
    config: &BridgeConfig,
    shutdown: &ProcessShutdown,
) -> anyhow::Result<()> {
    if config.wait_for_recv
        && !bridge
            .wait_for_recv(config.wait_timeout, config.poll_interval)
            .await
    {
        bail!(
            "no remote endpoint attached to {} within {:?}",
            bridge.topic_name(),
            config.wait_timeout
        );
    }

    bridge
        .start_liveness(config.heartbeat_timeout)
        .await
        .context("failed to start liveness monitor")?;
    info!("{}: bridge ready", bridge.topic_name());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("received Ctrl+C; shutting down"),
            Err(e) => {
                error!("failed to listen for Ctrl+C signal: {e}");
                shutdown.cancelled().await;
            }
        },
        () = shutdown.cancelled() => {}
    }

    if let Some(reason) = shutdown.reason() {
        bail!("bridge {} shut down: {reason}", bridge.topic_name());
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
