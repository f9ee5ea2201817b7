//! Bond-style heartbeat liveness monitor over the local bus.
//!
//! Both ends of a data channel run a [`HeartbeatMonitor`] on the same
//! liveness session id.  Each monitor publishes a beat on
//! `/bond/<session id>` every `heartbeat_period` and listens for beats from
//! the other side:
//!
//! ```text
//! first remote beat                      → formed
//! formed, silent for heartbeat_timeout   → broken
//! never formed within connect_timeout    → broken
//! remote beat with alive = false         → broken
//! ```
//!
//! `broken` is terminal: the monitor task exits after reporting it.  Stopping
//! a monitor publishes a final `alive = false` beat so the other side notices
//! immediately instead of waiting out the timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use channel_bridge_core::{
    DataMessage, InboundHandler, LivenessError, LivenessEvents, LivenessFactory, LivenessMonitor,
    Subscription, Transport,
};

use crate::infrastructure::local_bus::LocalBus;

/// Label carried by heartbeat messages.
const BOND_LABEL: &str = "bond";

/// Timing parameters of a bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub heartbeat_period: Duration,
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(4),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Topic both ends of a bond publish on.
pub fn bond_topic(session_id: &str) -> String {
    format!("/bond/{session_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Beat {
    instance: Uuid,
    alive: bool,
}

impl Beat {
    fn to_message(self) -> Option<DataMessage> {
        serde_json::to_vec(&self)
            .ok()
            .map(|bytes| DataMessage::text(BOND_LABEL, bytes))
    }
}

/// Forwards beats from other instances to the monitor task.
struct BeatListener {
    own: Uuid,
    tx: mpsc::Sender<bool>,
}

#[async_trait]
impl InboundHandler for BeatListener {
    async fn on_message(&self, message: DataMessage) {
        match serde_json::from_slice::<Beat>(&message.data) {
            Ok(beat) if beat.instance != self.own => {
                let _ = self.tx.send(beat.alive).await;
            }
            Ok(_) => {}
            Err(e) => warn!("ignoring malformed heartbeat: {e}"),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    subscription: Box<dyn Subscription>,
}

/// Heartbeat monitor for one liveness session.
pub struct HeartbeatMonitor {
    bus: LocalBus,
    session_id: String,
    config: HeartbeatConfig,
    instance: Uuid,
    running: Option<Running>,
}

impl HeartbeatMonitor {
    pub fn new(bus: LocalBus, session_id: impl Into<String>, config: HeartbeatConfig) -> Self {
        Self {
            bus,
            session_id: session_id.into(),
            config,
            instance: Uuid::new_v4(),
            running: None,
        }
    }
}

#[async_trait]
impl LivenessMonitor for HeartbeatMonitor {
    fn start(
        &mut self,
        events: Arc<dyn LivenessEvents>,
        heartbeat_timeout: Option<Duration>,
    ) -> Result<(), LivenessError> {
        if self.running.is_some() {
            return Err(LivenessError::AlreadyStarted);
        }

        let mut config = self.config;
        if let Some(timeout) = heartbeat_timeout {
            config.heartbeat_timeout = timeout;
        }

        let topic = bond_topic(&self.session_id);
        let (tx, rx) = mpsc::channel(16);
        let listener = Arc::new(BeatListener {
            own: self.instance,
            tx,
        });
        let subscription = self
            .bus
            .subscribe(&topic, 16, listener)
            .map_err(|e| LivenessError::Start(e.to_string()))?;

        let cancel = CancellationToken::new();
        let bond = Bond {
            bus: self.bus.clone(),
            topic,
            session_id: self.session_id.clone(),
            instance: self.instance,
            config,
            events,
        };
        let task = tokio::spawn(bond.run(rx, cancel.clone()));

        info!(
            "bond {} started (period {:?}, timeout {:?})",
            self.session_id, config.heartbeat_period, config.heartbeat_timeout
        );
        self.running = Some(Running {
            cancel,
            task,
            subscription,
        });
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.running.is_some()
    }

    async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        if let Err(e) = (&mut running.task).await {
            warn!("bond {} task ended abnormally: {e}", self.session_id);
        }
        running.subscription.unregister();
        info!("bond {} stopped", self.session_id);
    }
}

/// State owned by the monitor task.
struct Bond {
    bus: LocalBus,
    topic: String,
    session_id: String,
    instance: Uuid,
    config: HeartbeatConfig,
    events: Arc<dyn LivenessEvents>,
}

impl Bond {
    fn beat(&self, alive: bool) {
        if let Some(message) = (Beat {
            instance: self.instance,
            alive,
        })
        .to_message()
        {
            self.bus.publish(&self.topic, message);
        }
    }

    fn broken(&self, why: &str) {
        warn!("bond {} broken: {why}", self.session_id);
        self.events.on_broken();
    }

    async fn run(self, mut beats: mpsc::Receiver<bool>, cancel: CancellationToken) {
        let mut ticker = interval(self.config.heartbeat_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let started = Instant::now();
        let mut last_seen = started;
        let mut formed = false;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.beat(false);
                    debug!("bond {} cancelled", self.session_id);
                    return;
                }
                Some(alive) = beats.recv() => {
                    if !alive {
                        self.broken("remote side closed the bond");
                        return;
                    }
                    last_seen = Instant::now();
                    if !formed {
                        formed = true;
                        info!("bond {} formed", self.session_id);
                        self.events.on_formed();
                    }
                }
                _ = ticker.tick() => {
                    self.beat(true);
                    let now = Instant::now();
                    if formed && now - last_seen > self.config.heartbeat_timeout {
                        self.broken("heartbeat timeout");
                        return;
                    }
                    if !formed && now - started > self.config.connect_timeout {
                        self.broken("connect timeout");
                        return;
                    }
                }
            }
        }
    }
}

/// [`LivenessFactory`] producing [`HeartbeatMonitor`]s on one bus.
#[derive(Clone)]
pub struct HeartbeatFactory {
    bus: LocalBus,
    config: HeartbeatConfig,
}

impl HeartbeatFactory {
    pub fn new(bus: LocalBus, config: HeartbeatConfig) -> Self {
        Self { bus, config }
    }
}

impl LivenessFactory for HeartbeatFactory {
    fn create(&self, session_id: &str) -> Box<dyn LivenessMonitor> {
        Box::new(HeartbeatMonitor::new(
            self.bus.clone(),
            session_id,
            self.config,
        ))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
