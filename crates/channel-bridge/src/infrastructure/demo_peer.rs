//! Simulated remote data-channel owner.
//!
//! Lets the binary run end to end without a real peer process.  The demo peer:
//!
//! - attaches to the bridge's inbound topic (so the readiness wait succeeds),
//! - runs its own side of the heartbeat bond,
//! - advertises `send_data` and logs every reply the bridge sends, and
//! - publishes a `ping` frame every `ping_interval`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use channel_bridge_core::{
    BridgeIdentity, DataMessage, LivenessError, LivenessEvents, LivenessMonitor,
    SendDataRequest, SEND_DATA_ENDPOINT,
};

use crate::infrastructure::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::infrastructure::local_bus::{DataService, LocalBus};

/// Logs replies delivered to the peer.
#[derive(Default)]
struct ReplyLog {
    received: AtomicUsize,
}

#[async_trait]
impl DataService for ReplyLog {
    async fn handle(&self, request: SendDataRequest) -> Result<(), String> {
        self.received.fetch_add(1, Ordering::Relaxed);
        info!(
            "demo peer {} received on {}: {}",
            request.peer_id,
            request.data.label,
            request.data.payload_text()
        );
        Ok(())
    }
}

struct PeerBondEvents;

impl LivenessEvents for PeerBondEvents {
    fn on_formed(&self) {
        info!("demo peer: bond formed");
    }

    fn on_broken(&self) {
        warn!("demo peer: bond broken");
    }
}

/// A running simulated peer.
pub struct DemoPeer {
    bus: LocalBus,
    cancel: CancellationToken,
    pinger: JoinHandle<()>,
    bond: HeartbeatMonitor,
    replies: Arc<ReplyLog>,
}

impl DemoPeer {
    /// Starts a peer for the channel described by `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`LivenessError::Start`] if the peer's heartbeat can not start.
    pub fn spawn(
        bus: &LocalBus,
        identity: &BridgeIdentity,
        ping_interval: Duration,
        heartbeat: HeartbeatConfig,
    ) -> Result<Self, LivenessError> {
        let mut bond = HeartbeatMonitor::new(bus.clone(), identity.liveness_session_id(), heartbeat);
        bond.start(Arc::new(PeerBondEvents), None)?;

        let replies = Arc::new(ReplyLog::default());
        bus.advertise(SEND_DATA_ENDPOINT, replies.clone());

        let peer = bus.attach_peer(&identity.topic_name());
        let label = identity.label.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let pinger = tokio::spawn(async move {
            let mut ticker = interval(ping_interval);
            let mut id: u64 = 0;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = format!(r#"{{"op":"ping","id":{id}}}"#);
                        peer.publish(DataMessage::text(label.clone(), frame));
                        id += 1;
                    }
                }
            }
            // `peer` drops here and detaches from the topic.
        });

        info!("demo peer attached to {}", identity.topic_name());
        Ok(Self {
            bus: bus.clone(),
            cancel,
            pinger,
            bond,
            replies,
        })
    }

    /// Number of replies received so far.
    pub fn replies(&self) -> usize {
        self.replies.received.load(Ordering::Relaxed)
    }

    /// Detaches from the topic, closes the bond and withdraws `send_data`.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.pinger).await {
            warn!("demo peer pinger ended abnormally: {e}");
        }
        self.bond.stop().await;
        self.bus.unadvertise(SEND_DATA_ENDPOINT);
        info!("demo peer stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    use channel_bridge_core::{InboundHandler, Transport};
    use tokio::sync::mpsc::{self, UnboundedSender};
    use tokio::time::sleep;

    use crate::infrastructure::heartbeat::bond_topic;

    struct ForwardingHandler {
        tx: UnboundedSender<DataMessage>,
    }

    #[async_trait]
    impl InboundHandler for ForwardingHandler {
        async fn on_message(&self, message: DataMessage) {
            let _ = self.tx.send(message);
        }
    }

    fn identity() -> BridgeIdentity {
        BridgeIdentity::new("s", "p", "data")
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_publishes_numbered_pings_on_bridge_topic() {
        // Arrange
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe(&identity().topic_name(), 8, Arc::new(ForwardingHandler { tx }))
            .unwrap();

        // Act
        let peer = DemoPeer::spawn(
            &bus,
            &identity(),
            Duration::from_millis(100),
            HeartbeatConfig::default(),
        )
        .unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        // Assert
        assert_eq!(first.label, "data");
        assert_eq!(first.payload_text(), r#"{"op":"ping","id":0}"#);
        assert_eq!(second.payload_text(), r#"{"op":"ping","id":1}"#);
        assert_eq!(bus.peer_count(&identity().topic_name()), 1);

        peer.stop().await;
    }

    #[tokio::test]
    async fn test_peer_counts_replies_sent_to_its_service() {
        let bus = LocalBus::new();
        let peer = DemoPeer::spawn(
            &bus,
            &identity(),
            Duration::from_secs(60),
            HeartbeatConfig::default(),
        )
        .unwrap();
        let mut call = bus.open_call(SEND_DATA_ENDPOINT, true).unwrap();

        call.call(SendDataRequest {
            session_id: "s".to_string(),
            peer_id: "p".to_string(),
            data: DataMessage::text("data", r#"{"op":"pong"}"#),
        })
        .await
        .unwrap();

        assert_eq!(peer.replies(), 1);
        peer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_detaches_and_withdraws_service() {
        // Arrange
        let bus = LocalBus::new();
        let peer = DemoPeer::spawn(
            &bus,
            &identity(),
            Duration::from_millis(100),
            HeartbeatConfig::default(),
        )
        .unwrap();
        sleep(Duration::from_millis(10)).await;

        // Act
        peer.stop().await;

        // Assert
        assert_eq!(bus.peer_count(&identity().topic_name()), 0);
        assert_eq!(
            bus.subscriber_count(&bond_topic(&identity().liveness_session_id())),
            0
        );
        assert!(bus.open_call(SEND_DATA_ENDPOINT, true).is_err());
    }
}
