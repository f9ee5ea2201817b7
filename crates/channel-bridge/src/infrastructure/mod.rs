//! Infrastructure layer for channel-bridge.
//!
//! Concrete collaborators for the port traits of `channel-bridge-core`:
//!
//! - `local_bus`  – in-process pub/sub substrate (`Transport`)
//! - `heartbeat`  – bond-style heartbeat monitor (`LivenessMonitor`)
//! - `demo_peer`  – simulated remote endpoint for standalone runs
//!
//! # What does NOT belong here?
//!
//! - Relay and teardown logic (that is the application layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod demo_peer;
pub mod heartbeat;
pub mod local_bus;

pub use demo_peer::DemoPeer;
pub use heartbeat::{bond_topic, HeartbeatConfig, HeartbeatFactory, HeartbeatMonitor};
pub use local_bus::{DataService, LocalBus, PeerHandle};
