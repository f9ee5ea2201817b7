//! The bridge: one instance per logical data channel.
//!
//! A [`Bridge`] owns four resources and ties them to one lifecycle:
//!
//! | Resource        | Purpose                                         |
//! |-----------------|-------------------------------------------------|
//! | subscription    | inbound bus traffic → codec                     |
//! | outbound relay  | codec replies → serialized `send_data` calls    |
//! | codec           | intermediate text protocol engine               |
//! | liveness        | heartbeat bond with the remote channel owner    |
//!
//! ```text
//! bus topic ──► InboundRelay ──► codec.incoming ──► OutboundRelay::send ──► send_data
//!                                                     (lock held per call)
//! liveness monitor ──► LivenessGuard::on_broken ──► request_shutdown
//! ```
//!
//! # Fatal conditions
//!
//! A failed outbound call and a broken liveness bond both request process
//! shutdown.  The bridge never retries; the lifecycle driver reacts to the
//! shutdown request by calling [`Bridge::teardown`].
//!
//! # Teardown
//!
//! Each resource sits in an `Option` slot.  Teardown takes every slot before
//! releasing what it held (clear-then-check), in a fixed order:
//!
//! 1. liveness monitor (stopped only if it was started)
//! 2. codec (finished)
//! 3. subscription (unregistered)
//! 4. outbound call handle (closed)
//!
//! A slot that is already empty is skipped, so teardown is idempotent and
//! safe after a partially failed construction.  Inbound messages that race a
//! teardown find an empty codec slot and are dropped; sends that race it find
//! an empty call slot and fail with [`SinkError::TornDown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use channel_bridge_core::protocol::messages::DEFAULT_QUEUE_SIZE;
use channel_bridge_core::{
    BridgeIdentity, ClientId, CodecError, CodecFactory, DataMessage, Encoding, IdentityError,
    InboundHandler, LivenessError, LivenessEvents, LivenessFactory, LivenessMonitor,
    OutgoingSink, ProtocolCodec, SinkError, Subscription, Transport, TransportError,
    SEND_DATA_ENDPOINT,
};

use crate::application::outbound::OutboundRelay;
use crate::application::shutdown::ShutdownSignal;
use crate::domain::BridgeConfig;

/// Shutdown reason used when the liveness bond breaks.
pub const LIVENESS_BROKEN_REASON: &str = "liveness bond broken";

/// Lower bound on the readiness poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors surfaced by [`Bridge`] operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid bridge identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("failed to open {resource}: {source}")]
    Transport {
        resource: &'static str,
        #[source]
        source: TransportError,
    },

    #[error(transparent)]
    Liveness(#[from] LivenessError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("bridge has been torn down")]
    TornDown,
}

// ── Construction inputs ───────────────────────────────────────────────────────

/// Per-bridge construction parameters.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub identity: BridgeIdentity,
    /// Explicit client id; a random one is drawn when `None`.
    pub client_id: Option<ClientId>,
    /// Inbound queue size hint; [`DEFAULT_QUEUE_SIZE`] when `None`.
    pub queue_size: Option<usize>,
    /// Keep the `send_data` handle bound instead of resolving per call.
    pub persistent_send: bool,
}

impl BridgeOptions {
    pub fn new(identity: BridgeIdentity) -> Self {
        Self {
            identity,
            client_id: None,
            queue_size: None,
            persistent_send: false,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            identity: config.identity(),
            client_id: config.client_id.map(ClientId),
            queue_size: Some(config.queue_size),
            persistent_send: config.persistent_send,
        }
    }
}

// ── Shared slots ──────────────────────────────────────────────────────────────

type CodecSlot = Arc<Mutex<Option<Arc<dyn ProtocolCodec>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn current_codec(slot: &CodecSlot) -> Option<Arc<dyn ProtocolCodec>> {
    lock(slot).clone()
}

fn log_non_text(topic: &str, encoding: Encoding) {
    if encoding != Encoding::Utf8 {
        debug!("{topic}: reading {} payload as text", encoding.as_str());
    }
}

/// Subscription handler: forwards every inbound message to the codec.
struct InboundRelay {
    topic: String,
    codec: CodecSlot,
}

#[async_trait]
impl InboundHandler for InboundRelay {
    async fn on_message(&self, message: DataMessage) {
        let Some(codec) = current_codec(&self.codec) else {
            debug!("{}: dropping inbound message after teardown", self.topic);
            return;
        };
        log_non_text(&self.topic, message.encoding);
        let text = message.payload_text();
        if let Err(e) = codec.incoming(&text).await {
            debug!("{}: inbound message not processed: {e}", self.topic);
        }
    }
}

/// Liveness callbacks.  `on_broken` requests shutdown at most once.
pub struct LivenessGuard {
    session_id: String,
    shutdown: Arc<dyn ShutdownSignal>,
    broken: AtomicBool,
}

impl LivenessGuard {
    pub fn new(session_id: impl Into<String>, shutdown: Arc<dyn ShutdownSignal>) -> Self {
        Self {
            session_id: session_id.into(),
            shutdown,
            broken: AtomicBool::new(false),
        }
    }

}

impl LivenessEvents for LivenessGuard {
    fn on_formed(&self) {
        info!("liveness bond {} formed", self.session_id);
    }

    fn on_broken(&self) {
        if self.broken.swap(true, Ordering::AcqRel) {
            debug!("liveness bond {} already broken", self.session_id);
            return;
        }
        error!("liveness bond {} broken; remote endpoint lost", self.session_id);
        self.shutdown.request_shutdown(LIVENESS_BROKEN_REASON);
    }
}

// ── Bridge ────────────────────────────────────────────────────────────────────

/// Relays one data channel between the bus and its remote owner.
pub struct Bridge {
    identity: BridgeIdentity,
    client_id: ClientId,
    topic: String,
    codec: CodecSlot,
    subscription: Mutex<Option<Box<dyn Subscription>>>,
    outbound: Arc<OutboundRelay>,
    liveness: tokio::sync::Mutex<Option<Box<dyn LivenessMonitor>>>,
    liveness_events: Arc<LivenessGuard>,
    torn_down: AtomicBool,
}

impl Bridge {
    /// Acquires every resource of the bridge.  Never blocks.
    ///
    /// The liveness monitor is created but not started; see
    /// [`Bridge::start_liveness`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Identity`] for an ambiguous identity and
    /// [`BridgeError::Transport`] when the call handle or the subscription can
    /// not be opened.  Anything acquired before the failure is released.
    pub fn new(
        options: BridgeOptions,
        transport: &dyn Transport,
        codecs: &dyn CodecFactory,
        liveness: &dyn LivenessFactory,
        shutdown: Arc<dyn ShutdownSignal>,
    ) -> Result<Self, BridgeError> {
        let BridgeOptions {
            identity,
            client_id,
            queue_size,
            persistent_send,
        } = options;
        identity.validate()?;

        let client_id = client_id.unwrap_or_else(ClientId::random);
        let topic = identity.topic_name();
        let session_id = identity.liveness_session_id();

        let call = transport
            .open_call(SEND_DATA_ENDPOINT, persistent_send)
            .map_err(|source| BridgeError::Transport {
                resource: "outbound call",
                source,
            })?;
        let outbound = Arc::new(OutboundRelay::new(identity.clone(), call, shutdown.clone()));

        let sink: Arc<dyn OutgoingSink> = outbound.clone();
        let codec_slot: CodecSlot = Arc::new(Mutex::new(Some(codecs.create(client_id, sink))));

        let handler = Arc::new(InboundRelay {
            topic: topic.clone(),
            codec: codec_slot.clone(),
        });
        let subscription = match transport.subscribe(
            &topic,
            queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            handler,
        ) {
            Ok(sub) => sub,
            Err(source) => {
                if let Some(codec) = lock(&codec_slot).take() {
                    codec.finish();
                }
                outbound.close_unshared();
                return Err(BridgeError::Transport {
                    resource: "subscription",
                    source,
                });
            }
        };

        let monitor = liveness.create(&session_id);
        let liveness_events = Arc::new(LivenessGuard::new(session_id, shutdown));

        info!(
            "bridge {topic} created (client {client_id}, {} send)",
            if persistent_send { "persistent" } else { "per-call" }
        );

        Ok(Self {
            identity,
            client_id,
            topic,
            codec: codec_slot,
            subscription: Mutex::new(Some(subscription)),
            outbound,
            liveness: tokio::sync::Mutex::new(Some(monitor)),
            liveness_events,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &BridgeIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Remote endpoints attached to the inbound topic, or `None` once the
    /// subscription has been released.
    pub fn peer_count(&self) -> Option<usize> {
        lock(&self.subscription).as_ref().map(|s| s.peer_count())
    }

    /// Waits until a remote endpoint attaches to the inbound topic.
    ///
    /// Polls every `poll_interval` (at least 1 ms).  Returns `false` when
    /// `timeout` elapses first or when the bridge is torn down while waiting.
    pub async fn wait_for_recv(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        // `None` when the timeout is too large to represent: wait unbounded.
        let deadline = Instant::now().checked_add(timeout);

        loop {
            match self.peer_count() {
                None => {
                    info!("{}: torn down while waiting for a peer", self.topic);
                    return false;
                }
                Some(n) if n > 0 => {
                    info!("{}: {n} peer(s) attached", self.topic);
                    return true;
                }
                Some(_) => {}
            }

            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!("{}: no peer attached within {timeout:?}", self.topic);
                        return false;
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };
            sleep(nap).await;
        }
    }

    /// Feeds one inbound payload to the codec.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TornDown`] after teardown; [`BridgeError::Codec`] with
    /// whatever the codec reported, including a failed reply delivery.
    pub async fn on_inbound_message(
        &self,
        encoding: Encoding,
        data: &[u8],
    ) -> Result<(), BridgeError> {
        let codec = current_codec(&self.codec).ok_or(BridgeError::TornDown)?;
        log_non_text(&self.topic, encoding);
        let text = String::from_utf8_lossy(data);
        codec.incoming(&text).await?;
        Ok(())
    }

    /// Sends one encoded frame through the serialized outbound path.
    pub async fn send_outbound(&self, bytes: Vec<u8>) -> Result<(), SinkError> {
        self.outbound.send(bytes).await
    }

    /// Starts the liveness monitor, optionally overriding its heartbeat timeout.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TornDown`] after teardown; [`BridgeError::Liveness`] if
    /// the monitor refuses to start (e.g. it was already started).
    pub async fn start_liveness(
        &self,
        heartbeat_timeout: Option<Duration>,
    ) -> Result<(), BridgeError> {
        let mut slot = self.liveness.lock().await;
        let monitor = slot.as_mut().ok_or(BridgeError::TornDown)?;
        monitor.start(self.liveness_events.clone(), heartbeat_timeout)?;
        info!(
            "{}: liveness monitor started for {}",
            self.topic,
            self.identity.liveness_session_id()
        );
        Ok(())
    }

    /// Releases every resource in fixed order.  Idempotent.
    pub async fn teardown(&self) {
        if !self.torn_down.swap(true, Ordering::AcqRel) {
            info!("{}: tearing down", self.topic);
        }

        let monitor = self.liveness.lock().await.take();
        if let Some(mut monitor) = monitor {
            if monitor.is_active() {
                monitor.stop().await;
                debug!("{}: liveness monitor stopped", self.topic);
            }
        }

        let codec = lock(&self.codec).take();
        if let Some(codec) = codec {
            codec.finish();
            debug!("{}: codec finished", self.topic);
        }

        let subscription = lock(&self.subscription).take();
        if let Some(mut subscription) = subscription {
            subscription.unregister();
            debug!("{}: subscription unregistered", self.topic);
        }

        self.outbound.close().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
