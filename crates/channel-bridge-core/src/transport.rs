//! Port traits for the pub/sub substrate.
//!
//! The bridge needs exactly two things from the bus:
//!
//! 1. A **subscription** on its inbound topic that invokes a handler for every
//!    message and can report how many remote endpoints are attached.
//! 2. An **outbound call** handle to the `send_data` endpoint
//!    ([`SEND_DATA_ENDPOINT`]), either kept open (persistent) or resolved anew
//!    for every call.
//!
//! Opening either resource never blocks; only [`OutboundCall::call`] does.
//!
//! [`SEND_DATA_ENDPOINT`]: crate::protocol::messages::SEND_DATA_ENDPOINT

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::messages::{DataMessage, SendDataRequest};

/// Error type for transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No service is advertised under the requested endpoint.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The handle has been closed.
    #[error("call handle is closed")]
    Closed,

    /// The remote service reported a failure.
    #[error("call failed: {0}")]
    CallFailed(String),

    /// The subscription could not be opened.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Receives messages delivered to a subscription.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_message(&self, message: DataMessage);
}

/// An open subscription on one topic.
pub trait Subscription: Send + Sync {
    /// Topic this subscription listens on.
    fn topic(&self) -> &str;

    /// Number of remote endpoints currently attached to the topic.
    fn peer_count(&self) -> usize;

    /// Stops delivery.  Idempotent.
    fn unregister(&mut self);
}

/// A handle for request/response calls to one endpoint.
#[async_trait]
pub trait OutboundCall: Send + Sync {
    /// Performs one call and waits for the response.
    async fn call(&mut self, request: SendDataRequest) -> Result<(), TransportError>;

    /// Releases the handle.  Idempotent; later calls fail with
    /// [`TransportError::Closed`].
    fn close(&mut self);
}

/// The pub/sub substrate.
pub trait Transport: Send + Sync {
    /// Subscribes `handler` to `topic` with an inbound queue of `queue_size`.
    fn subscribe(
        &self,
        topic: &str,
        queue_size: usize,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Opens a call handle to `endpoint`.
    ///
    /// A `persistent` handle binds to the service now and keeps that binding;
    /// otherwise the service is looked up on every call.
    fn open_call(
        &self,
        endpoint: &str,
        persistent: bool,
    ) -> Result<Box<dyn OutboundCall>, TransportError>;
}
