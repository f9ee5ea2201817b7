//! channel-bridge library crate.
//!
//! This crate relays traffic for one peer-to-peer data channel between a
//! pub/sub bus and the remote process that owns the other end of the channel.
//!
//! # Architecture
//!
//! ```text
//! Remote data-channel owner
//!         ↕  (bus topic in, "send_data" call out, heartbeat bond)
//! [channel-bridge]
//!   ├── domain/           BridgeConfig
//!   ├── application/
//!   │     ├── bridge/     Bridge: wiring, readiness wait, teardown
//!   │     ├── outbound/   Serialized send path (codec sink)
//!   │     └── shutdown/   Process-wide shutdown capability
//!   └── infrastructure/
//!         ├── local_bus/  In-process pub/sub substrate
//!         ├── heartbeat/  Bond-style liveness monitor
//!         └── demo_peer/  Simulated remote endpoint
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no external dependencies (no I/O, no async).
//! - `application` depends on `domain` and the port traits of
//!   `channel-bridge-core` only; every collaborator is injected.
//! - `infrastructure` provides concrete collaborators and depends on `tokio`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: the bridge and its send path.
pub mod application;

/// Infrastructure layer: bus, heartbeat monitor, simulated peer.
pub mod infrastructure;
