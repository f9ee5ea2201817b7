//! Domain entities for the data-channel bridge.
//!
//! This module contains pure values with no infrastructure dependencies: the
//! identity of a bridge and the names derived from it.  Everything here can be
//! compiled and tested without a runtime or a bus.

/// Bridge identity and derived topic / session names.
///
/// See [`identity::BridgeIdentity`] for the main type.
pub mod identity;
