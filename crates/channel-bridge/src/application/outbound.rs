//! Serialized outbound send path.
//!
//! [`OutboundRelay`] is the codec's [`OutgoingSink`].  Every encoded frame is
//! wrapped in a [`SendDataRequest`] addressed to the bridge's session and peer
//! and pushed through the `send_data` call handle.
//!
//! The handle sits behind a `tokio::sync::Mutex` that is held for the *whole*
//! call, not just for enqueueing: the call completes remotely before the next
//! one may start, so frames reach the wire in the order they were issued and
//! no two calls are ever in flight for one bridge.
//!
//! A failed call is fatal for the bridge.  The relay logs it, requests
//! process shutdown, and returns the failure to the codec.  A send attempted
//! after the handle was released fails with [`SinkError::TornDown`] instead.
//!
//! Closing cancels the relay before it takes the lock, so a call that never
//! returns is abandoned (its sender sees [`SinkError::TornDown`]) and close
//! does not wait on it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use channel_bridge_core::{
    BridgeIdentity, DataMessage, OutboundCall, OutgoingSink, SendDataRequest, SinkError,
};

use crate::application::shutdown::ShutdownSignal;

/// Shutdown reason used when an outbound call fails.
pub const DELIVERY_FAILED_REASON: &str = "outbound delivery failed";

/// Owns the outbound call handle and serializes every call through it.
pub struct OutboundRelay {
    identity: BridgeIdentity,
    call: Mutex<Option<Box<dyn OutboundCall>>>,
    closed: CancellationToken,
    shutdown: Arc<dyn ShutdownSignal>,
}

impl OutboundRelay {
    pub fn new(
        identity: BridgeIdentity,
        call: Box<dyn OutboundCall>,
        shutdown: Arc<dyn ShutdownSignal>,
    ) -> Self {
        Self {
            identity,
            call: Mutex::new(Some(call)),
            closed: CancellationToken::new(),
            shutdown,
        }
    }

    /// Closes and releases the call handle.
    ///
    /// An in-flight call is abandoned rather than awaited.  Returns `false` if
    /// the handle had already been released.
    pub async fn close(&self) -> bool {
        self.closed.cancel();
        let released = self.call.lock().await.take();
        match released {
            Some(mut call) => {
                call.close();
                debug!("{}: outbound call handle closed", self.identity);
                true
            }
            None => false,
        }
    }

    /// Releases the handle without waiting.
    ///
    /// Only valid while nothing else holds the relay, i.e. while the bridge is
    /// still being constructed.
    pub(crate) fn close_unshared(&self) {
        self.closed.cancel();
        if let Ok(mut slot) = self.call.try_lock() {
            if let Some(mut call) = slot.take() {
                call.close();
            }
        }
    }

    fn request_for(&self, bytes: Vec<u8>) -> SendDataRequest {
        SendDataRequest {
            session_id: self.identity.session_id.clone(),
            peer_id: self.identity.peer_id.clone(),
            data: DataMessage::text(self.identity.label.clone(), bytes),
        }
    }
}

#[async_trait]
impl OutgoingSink for OutboundRelay {
    async fn send(&self, bytes: Vec<u8>) -> Result<(), SinkError> {
        let request = self.request_for(bytes);

        // Held until the call returns or the relay is closed.
        let locked = tokio::select! {
            () = self.closed.cancelled() => None,
            slot = self.call.lock() => Some(slot),
        };
        let Some(mut slot) = locked else {
            return Err(SinkError::TornDown);
        };
        let Some(call) = slot.as_mut() else {
            debug!("{}: dropping outbound frame after teardown", self.identity);
            return Err(SinkError::TornDown);
        };

        let outcome = tokio::select! {
            () = self.closed.cancelled() => None,
            outcome = call.call(request) => Some(outcome),
        };
        match outcome {
            None => {
                debug!("{}: in-flight call abandoned on close", self.identity);
                Err(SinkError::TornDown)
            }
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                error!("{}: outbound call failed: {e}", self.identity);
                self.shutdown.request_shutdown(DELIVERY_FAILED_REASON);
                Err(SinkError::Delivery(e.to_string()))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use channel_bridge_core::{Encoding, TransportError};

    #[derive(Default)]
    struct RecordingShutdown {
        reasons: StdMutex<Vec<String>>,
    }

    impl ShutdownSignal for RecordingShutdown {
        fn request_shutdown(&self, reason: &str) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }

    struct RecordingCall {
        requests: Arc<StdMutex<Vec<SendDataRequest>>>,
        closes: Arc<StdMutex<u32>>,
        fail: bool,
    }

    #[async_trait]
    impl OutboundCall for RecordingCall {
        async fn call(&mut self, request: SendDataRequest) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::ServiceUnavailable("send_data".to_string()));
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }

        fn close(&mut self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    struct Fixture {
        relay: OutboundRelay,
        requests: Arc<StdMutex<Vec<SendDataRequest>>>,
        closes: Arc<StdMutex<u32>>,
        shutdown: Arc<RecordingShutdown>,
    }

    fn fixture(fail: bool) -> Fixture {
        let requests = Arc::new(StdMutex::new(Vec::new()));
        let closes = Arc::new(StdMutex::new(0));
        let shutdown = Arc::new(RecordingShutdown::default());
        let call = RecordingCall {
            requests: requests.clone(),
            closes: closes.clone(),
            fail,
        };
        let relay = OutboundRelay::new(
            BridgeIdentity::new("s1", "p1", "chat"),
            Box::new(call),
            shutdown.clone(),
        );
        Fixture {
            relay,
            requests,
            closes,
            shutdown,
        }
    }

    #[tokio::test]
    async fn test_send_wraps_bytes_in_addressed_request() {
        // Arrange
        let f = fixture(false);

        // Act
        f.relay.send(b"frame".to_vec()).await.unwrap();

        // Assert
        let requests = f.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].session_id, "s1");
        assert_eq!(requests[0].peer_id, "p1");
        assert_eq!(requests[0].data.label, "chat");
        assert_eq!(requests[0].data.encoding, Encoding::Utf8);
        assert_eq!(requests[0].data.data, b"frame");
    }

    #[tokio::test]
    async fn test_failed_call_requests_shutdown_and_returns_error() {
        let f = fixture(true);

        let result = f.relay.send(b"frame".to_vec()).await;

        assert!(matches!(result, Err(SinkError::Delivery(_))));
        assert_eq!(
            *f.shutdown.reasons.lock().unwrap(),
            vec![DELIVERY_FAILED_REASON.to_string()]
        );
    }

    #[tokio::test]
    async fn test_send_after_close_fails_cleanly_without_shutdown() {
        // Arrange
        let f = fixture(false);
        assert!(f.relay.close().await);

        // Act
        let result = f.relay.send(b"late".to_vec()).await;

        // Assert
        assert_eq!(result, Err(SinkError::TornDown));
        assert!(f.requests.lock().unwrap().is_empty());
        assert!(f.shutdown.reasons.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_handle_once() {
        let f = fixture(false);

        assert!(f.relay.close().await);
        assert!(!f.relay.close().await);

        assert_eq!(*f.closes.lock().unwrap(), 1);
    }

    /// A call that never completes.
    struct HungCall {
        closes: Arc<StdMutex<u32>>,
    }

    #[async_trait]
    impl OutboundCall for HungCall {
        async fn call(&mut self, _request: SendDataRequest) -> Result<(), TransportError> {
            std::future::pending().await
        }

        fn close(&mut self) {
            *self.closes.lock().unwrap() += 1;
        }
    }

    #[tokio::test]
    async fn test_close_abandons_hung_call() {
        // Arrange: a send is parked inside a call that never returns
        let closes = Arc::new(StdMutex::new(0));
        let shutdown = Arc::new(RecordingShutdown::default());
        let relay = Arc::new(OutboundRelay::new(
            BridgeIdentity::new("s1", "p1", "chat"),
            Box::new(HungCall {
                closes: closes.clone(),
            }),
            shutdown.clone(),
        ));
        let sender = {
            let relay = relay.clone();
            tokio::spawn(async move { relay.send(b"frame".to_vec()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Act
        let closed = tokio::time::timeout(std::time::Duration::from_secs(2), relay.close())
            .await
            .expect("close waited on the hung call");

        // Assert
        assert!(closed);
        assert_eq!(sender.await.unwrap(), Err(SinkError::TornDown));
        assert_eq!(*closes.lock().unwrap(), 1);
        assert!(shutdown.reasons.lock().unwrap().is_empty());
    }

    #[test]
    fn test_close_unshared_releases_handle() {
        let f = fixture(false);

        f.relay.close_unshared();
        f.relay.close_unshared();

        assert_eq!(*f.closes.lock().unwrap(), 1);
    }
}
