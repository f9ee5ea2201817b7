//! In-process pub/sub bus.
//!
//! [`LocalBus`] implements the [`Transport`] port entirely inside one process.
//! It backs the binary and the integration tests; a deployment on a real
//! message bus would provide its own `Transport` implementation.
//!
//! # Topics
//!
//! Every subscription owns a bounded `tokio::sync::mpsc` queue sized by the
//! subscriber's queue hint and a task that drains it, invoking the handler
//! once per message in arrival order.  When a queue is full the newest message
//! is dropped with a warning, so a slow subscriber never stalls publishers.
//!
//! Remote endpoints attach to a topic through [`LocalBus::attach_peer`]; the
//! returned [`PeerHandle`] counts toward [`Subscription::peer_count`] until it
//! is dropped.
//!
//! # Services
//!
//! Request/response endpoints are registered with [`LocalBus::advertise`].  A
//! persistent call handle binds to the service when it is opened; a per-call
//! handle looks the service up on every call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use channel_bridge_core::{
    DataMessage, InboundHandler, OutboundCall, SendDataRequest, Subscription, Transport,
    TransportError,
};

/// Server side of a request/response endpoint.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn handle(&self, request: SendDataRequest) -> Result<(), String>;
}

#[derive(Default)]
struct TopicState {
    subscribers: HashMap<u64, mpsc::Sender<DataMessage>>,
    peers: usize,
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicState>,
    services: HashMap<String, Arc<dyn DataService>>,
    next_subscription_id: u64,
}

/// Cheaply cloneable handle to one in-process bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a remote endpoint to `topic`.
    pub fn attach_peer(&self, topic: &str) -> PeerHandle {
        self.state()
            .topics
            .entry(topic.to_string())
            .or_default()
            .peers += 1;
        debug!("peer attached to {topic}");
        PeerHandle {
            bus: self.clone(),
            topic: topic.to_string(),
        }
    }

    fn detach_peer(&self, topic: &str) {
        let mut state = self.state();
        if let Some(t) = state.topics.get_mut(topic) {
            t.peers = t.peers.saturating_sub(1);
        }
        debug!("peer detached from {topic}");
    }

    /// Number of remote endpoints attached to `topic`.
    pub fn peer_count(&self, topic: &str) -> usize {
        self.state().topics.get(topic).map_or(0, |t| t.peers)
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.state()
            .topics
            .get(topic)
            .map_or(0, |t| t.subscribers.len())
    }

    /// Fans `message` out to every subscription on `topic`.
    ///
    /// Returns how many subscriptions accepted it.
    pub fn publish(&self, topic: &str, message: DataMessage) -> usize {
        let state = self.state();
        let Some(t) = state.topics.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for sender in t.subscribers.values() {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => warn!("{topic}: subscriber queue full; dropping message"),
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Registers `service` under `endpoint`, replacing any previous one.
    pub fn advertise(&self, endpoint: &str, service: Arc<dyn DataService>) {
        self.state().services.insert(endpoint.to_string(), service);
        debug!("service {endpoint} advertised");
    }

    pub fn unadvertise(&self, endpoint: &str) {
        self.state().services.remove(endpoint);
        debug!("service {endpoint} withdrawn");
    }

    fn service(&self, endpoint: &str) -> Option<Arc<dyn DataService>> {
        self.state().services.get(endpoint).cloned()
    }

    fn remove_subscriber(&self, topic: &str, id: u64) {
        let mut state = self.state();
        if let Some(t) = state.topics.get_mut(topic) {
            t.subscribers.remove(&id);
        }
    }
}

impl Transport for LocalBus {
    fn subscribe(
        &self,
        topic: &str,
        queue_size: usize,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<DataMessage>(queue_size.max(1));
        let id = {
            let mut state = self.state();
            let id = state.next_subscription_id;
            state.next_subscription_id += 1;
            state
                .topics
                .entry(topic.to_string())
                .or_default()
                .subscribers
                .insert(id, tx);
            id
        };

        // Ends once the sender is removed and the queue is drained.
        runtime.spawn(async move {
            while let Some(message) = rx.recv().await {
                handler.on_message(message).await;
            }
        });

        debug!("subscription {id} opened on {topic}");
        Ok(Box::new(LocalSubscription {
            bus: self.clone(),
            topic: topic.to_string(),
            id,
            registered: true,
        }))
    }

    fn open_call(
        &self,
        endpoint: &str,
        persistent: bool,
    ) -> Result<Box<dyn OutboundCall>, TransportError> {
        let bound = if persistent {
            Some(
                self.service(endpoint)
                    .ok_or_else(|| TransportError::ServiceUnavailable(endpoint.to_string()))?,
            )
        } else {
            None
        };

        Ok(Box::new(LocalCall {
            bus: self.clone(),
            endpoint: endpoint.to_string(),
            bound,
            closed: false,
        }))
    }
}

/// A remote endpoint attached to one topic.  Detaches on drop.
pub struct PeerHandle {
    bus: LocalBus,
    topic: String,
}

impl PeerHandle {
    /// Publishes on the attached topic.
    pub fn publish(&self, message: DataMessage) -> usize {
        self.bus.publish(&self.topic, message)
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.bus.detach_peer(&self.topic);
    }
}

struct LocalSubscription {
    bus: LocalBus,
    topic: String,
    id: u64,
    registered: bool,
}

impl Subscription for LocalSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn peer_count(&self) -> usize {
        self.bus.peer_count(&self.topic)
    }

    fn unregister(&mut self) {
        if std::mem::replace(&mut self.registered, false) {
            self.bus.remove_subscriber(&self.topic, self.id);
            debug!("subscription {} on {} unregistered", self.id, self.topic);
        }
    }
}

impl Drop for LocalSubscription {
    fn drop(&mut self) {
        self.unregister();
    }
}

struct LocalCall {
    bus: LocalBus,
    endpoint: String,
    bound: Option<Arc<dyn DataService>>,
    closed: bool,
}

#[async_trait]
impl OutboundCall for LocalCall {
    async fn call(&mut self, request: SendDataRequest) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let service = match &self.bound {
            Some(service) => service.clone(),
            None => self
                .bus
                .service(&self.endpoint)
                .ok_or_else(|| TransportError::ServiceUnavailable(self.endpoint.clone()))?,
        };
        service
            .handle(request)
            .await
            .map_err(TransportError::CallFailed)
    }

    fn close(&mut self) {
        self.closed = true;
        self.bound = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc::UnboundedSender;

    struct ForwardingHandler {
        tx: UnboundedSender<DataMessage>,
    }

    #[async_trait]
    impl InboundHandler for ForwardingHandler {
        async fn on_message(&self, message: DataMessage) {
            let _ = self.tx.send(message);
        }
    }

    #[derive(Default)]
    struct RecordingService {
        requests: Mutex<Vec<SendDataRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl DataService for RecordingService {
        async fn handle(&self, request: SendDataRequest) -> Result<(), String> {
            if self.fail {
                return Err("rejected".to_string());
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    fn request() -> SendDataRequest {
        SendDataRequest {
            session_id: "s".to_string(),
            peer_id: "p".to_string(),
            data: DataMessage::text("l", "x"),
        }
    }

    #[tokio::test]
    async fn test_published_message_reaches_subscriber() {
        // Arrange
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = bus
            .subscribe("t", 4, Arc::new(ForwardingHandler { tx }))
            .unwrap();

        // Act
        let delivered = bus.publish("t", DataMessage::text("l", "hello"));

        // Assert
        assert_eq!(delivered, 1);
        let got = rx.recv().await.unwrap();
        assert_eq!(got.data, b"hello");
    }

    #[tokio::test]
    async fn test_unregistered_subscription_stops_receiving() {
        let bus = LocalBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sub = bus
            .subscribe("t", 4, Arc::new(ForwardingHandler { tx }))
            .unwrap();

        sub.unregister();
        sub.unregister();

        assert_eq!(bus.subscriber_count("t"), 0);
        assert_eq!(bus.publish("t", DataMessage::text("l", "x")), 0);
    }

    #[tokio::test]
    async fn test_peer_count_tracks_attached_handles() {
        let bus = LocalBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sub = bus
            .subscribe("t", 4, Arc::new(ForwardingHandler { tx }))
            .unwrap();
        assert_eq!(sub.peer_count(), 0);

        let peer = bus.attach_peer("t");
        assert_eq!(sub.peer_count(), 1);

        drop(peer);
        assert_eq!(sub.peer_count(), 0);
    }

    #[test]
    fn test_subscribe_without_runtime_fails() {
        let bus = LocalBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = bus.subscribe("t", 4, Arc::new(ForwardingHandler { tx }));

        assert!(matches!(result, Err(TransportError::Subscribe(_))));
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest_message() {
        // Arrange: a handler that never completes keeps the queue from draining
        struct StuckHandler;
        #[async_trait]
        impl InboundHandler for StuckHandler {
            async fn on_message(&self, _message: DataMessage) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
        let bus = LocalBus::new();
        let _sub = bus.subscribe("t", 1, Arc::new(StuckHandler)).unwrap();

        // Act: the first message is taken by the handler, the second fills the
        // queue, the third is dropped
        bus.publish("t", DataMessage::text("l", "1"));
        tokio::task::yield_now().await;
        let second = bus.publish("t", DataMessage::text("l", "2"));
        let third = bus.publish("t", DataMessage::text("l", "3"));

        // Assert
        assert_eq!(second, 1);
        assert_eq!(third, 0);
    }

    #[tokio::test]
    async fn test_persistent_call_requires_advertised_service() {
        let bus = LocalBus::new();

        let result = bus.open_call("send_data", true);

        assert!(matches!(
            result,
            Err(TransportError::ServiceUnavailable(ref e)) if e == "send_data"
        ));
    }

    #[tokio::test]
    async fn test_per_call_handle_resolves_service_on_each_call() {
        // Arrange: open before the service exists
        let bus = LocalBus::new();
        let mut call = bus.open_call("send_data", false).unwrap();
        assert!(matches!(
            call.call(request()).await,
            Err(TransportError::ServiceUnavailable(_))
        ));

        // Act: advertise afterwards
        let service = Arc::new(RecordingService::default());
        bus.advertise("send_data", service.clone());
        call.call(request()).await.unwrap();

        // Assert
        assert_eq!(service.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_call_keeps_binding_after_unadvertise() {
        let bus = LocalBus::new();
        let service = Arc::new(RecordingService::default());
        bus.advertise("send_data", service.clone());
        let mut call = bus.open_call("send_data", true).unwrap();

        bus.unadvertise("send_data");
        call.call(request()).await.unwrap();

        assert_eq!(service.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_service_failure_surfaces_as_call_failed() {
        let bus = LocalBus::new();
        bus.advertise(
            "send_data",
            Arc::new(RecordingService {
                requests: Mutex::new(Vec::new()),
                fail: true,
            }),
        );
        let mut call = bus.open_call("send_data", false).unwrap();

        let result = call.call(request()).await;

        assert_eq!(result, Err(TransportError::CallFailed("rejected".to_string())));
    }

    #[tokio::test]
    async fn test_closed_call_is_rejected() {
        let bus = LocalBus::new();
        bus.advertise("send_data", Arc::new(RecordingService::default()));
        let mut call = bus.open_call("send_data", true).unwrap();

        call.close();
        call.close();

        assert_eq!(call.call(request()).await, Err(TransportError::Closed));
    }
}
