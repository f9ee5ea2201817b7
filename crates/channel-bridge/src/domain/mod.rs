//! Domain layer for channel-bridge.
//!
//! Pure configuration types with no dependencies on I/O, networking or the
//! async runtime.  The binary populates them from CLI arguments; tests build
//! them directly.

pub mod config;

pub use config::BridgeConfig;
