//! Application layer for channel-bridge.
//!
//! The application layer knows *what* the bridge does: relay inbound traffic
//! into the codec, serialize codec replies onto the bus, and shut the process
//! down when the remote endpoint is lost.  *How* messages move is delegated to
//! the port traits of `channel-bridge-core`, injected at construction.
//!
//! # What does NOT belong here?
//!
//! - Concrete bus or heartbeat implementations (that is infrastructure)
//! - Signal handling and CLI parsing (that happens in `main.rs`)

pub mod bridge;
pub mod outbound;
pub mod shutdown;

pub use bridge::{Bridge, BridgeError, BridgeOptions, LivenessGuard, LIVENESS_BROKEN_REASON};
pub use outbound::{OutboundRelay, DELIVERY_FAILED_REASON};
pub use shutdown::{ProcessShutdown, ShutdownSignal};
