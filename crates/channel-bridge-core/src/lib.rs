//! # channel-bridge-core
//!
//! Shared library for the data-channel bridge containing the bridge identity,
//! the transport message shapes, the intermediate text protocol codec, and the
//! port traits that the bridge uses to talk to its external collaborators.
//!
//! This crate has zero dependencies on async runtimes, sockets, or any concrete
//! pub/sub substrate.
//!
//! # Architecture overview
//!
//! A bridge relays traffic for one logical data channel between a pub/sub bus
//! and the remote process that owns the other end of the channel:
//!
//! ```text
//! bus subscription ──► Bridge ──► ProtocolCodec::incoming
//!                                        │
//!                                        ▼
//! bus "send_data" call ◄── OutgoingSink::send
//! ```
//!
//! - **`domain`** – Who a bridge is: the `(session, peer, label)` triple, the
//!   process-local client id, and the names derived from them.
//! - **`protocol`** – What travels on the bus: [`DataMessage`] and
//!   [`SendDataRequest`], plus the codec that speaks the intermediate text
//!   protocol carried inside them.
//! - **`transport`** / **`liveness`** – Traits for the pub/sub substrate and
//!   the heartbeat bond.  Implementations live in the `channel-bridge` crate
//!   (and in test doubles).

pub mod domain;
pub mod liveness;
pub mod protocol;
pub mod transport;

// Re-export the most-used types at the crate root so callers can write
// `channel_bridge_core::BridgeIdentity` instead of the full module path.
pub use domain::identity::{BridgeIdentity, ClientId, IdentityError};
pub use liveness::{LivenessError, LivenessEvents, LivenessFactory, LivenessMonitor};
pub use protocol::codec::{
    CodecError, CodecFactory, OpCodec, OpCodecFactory, OutgoingSink, ProtocolCodec, SinkError,
};
pub use protocol::messages::{DataMessage, Encoding, SendDataRequest, SEND_DATA_ENDPOINT};
pub use transport::{InboundHandler, OutboundCall, Subscription, Transport, TransportError};
