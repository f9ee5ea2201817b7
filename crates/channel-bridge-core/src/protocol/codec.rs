//! Codec for the intermediate text protocol carried inside [`DataMessage`]s.
//!
//! The bridge treats the codec as an opaque engine with two entry points:
//!
//! - [`ProtocolCodec::incoming`] – hand it one decoded text frame; it parses and
//!   dispatches the operation and may emit any number of replies.
//! - [`ProtocolCodec::finish`] – release protocol state; called once on teardown.
//!
//! Replies leave the codec through the [`OutgoingSink`] it was constructed
//! with.  The sink is a constructor argument (see [`CodecFactory`]) so that the
//! dependency is explicit and can be replaced by a recording double in tests.
//!
//! # Reference protocol
//!
//! [`OpCodec`] implements a small JSON protocol in which every frame is an
//! object with an `"op"` field:
//!
//! ```text
//! → {"op":"ping","id":7}
//! ← {"op":"pong","id":7}
//!
//! → {"op":"subscribe"}
//! ← {"op":"status","level":"error","msg":"unsupported op: subscribe"}
//! ```
//!
//! Protocol errors never escape as `Err`: they are answered in-band with a
//! `status` frame.  Only sink failures and use-after-finish are reported to the
//! caller.
//!
//! [`DataMessage`]: crate::protocol::messages::DataMessage

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::identity::ClientId;

/// Errors reported by an [`OutgoingSink`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The sink's underlying resources have already been released.
    #[error("bridge has been torn down")]
    TornDown,

    /// The outbound delivery itself failed.
    #[error("outbound delivery failed: {0}")]
    Delivery(String),
}

/// Errors reported by [`ProtocolCodec::incoming`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// `incoming` was called after `finish`.
    #[error("codec has been finished")]
    Finished,

    /// A reply could not be delivered.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// A reply could not be serialized.
    #[error("failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for encoded replies produced by a codec.
#[async_trait]
pub trait OutgoingSink: Send + Sync {
    /// Delivers one encoded frame.
    async fn send(&self, bytes: Vec<u8>) -> Result<(), SinkError>;
}

/// A stateful encoder/decoder of the intermediate text protocol.
#[async_trait]
pub trait ProtocolCodec: Send + Sync {
    /// Decodes and dispatches one incoming text frame.
    async fn incoming(&self, text: &str) -> Result<(), CodecError>;

    /// Releases protocol state.  Subsequent `incoming` calls are rejected.
    fn finish(&self);
}

/// Builds a codec bound to a client id and wired to its outgoing sink.
pub trait CodecFactory: Send + Sync {
    fn create(&self, client_id: ClientId, sink: Arc<dyn OutgoingSink>) -> Arc<dyn ProtocolCodec>;
}

// ── Reference codec ───────────────────────────────────────────────────────────

/// Fields every incoming frame must have.
#[derive(Debug, Deserialize)]
struct Envelope {
    op: String,
    #[serde(default)]
    id: Option<Value>,
}

/// Frames the reference codec emits.
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Reply {
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
    Status {
        level: &'static str,
        msg: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<Value>,
    },
}

/// JSON `op` protocol codec.
pub struct OpCodec {
    client_id: ClientId,
    sink: Arc<dyn OutgoingSink>,
    finished: AtomicBool,
}

impl OpCodec {
    pub fn new(client_id: ClientId, sink: Arc<dyn OutgoingSink>) -> Self {
        Self {
            client_id,
            sink,
            finished: AtomicBool::new(false),
        }
    }

    fn dispatch(&self, text: &str) -> Reply {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("client {}: malformed frame: {e}", self.client_id);
                return Reply::Status {
                    level: "error",
                    msg: format!("malformed frame: {e}"),
                    id: None,
                };
            }
        };

        debug!("client {}: op {}", self.client_id, envelope.op);

        match envelope.op.as_str() {
            "ping" => Reply::Pong { id: envelope.id },
            other => Reply::Status {
                level: "error",
                msg: format!("unsupported op: {other}"),
                id: envelope.id,
            },
        }
    }
}

#[async_trait]
impl ProtocolCodec for OpCodec {
    async fn incoming(&self, text: &str) -> Result<(), CodecError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(CodecError::Finished);
        }

        let reply = self.dispatch(text);
        let bytes = serde_json::to_vec(&reply)?;
        self.sink.send(bytes).await?;
        Ok(())
    }

    fn finish(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            debug!("client {}: codec finished", self.client_id);
        }
    }
}

/// [`CodecFactory`] producing [`OpCodec`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpCodecFactory;

impl CodecFactory for OpCodecFactory {
    fn create(&self, client_id: ClientId, sink: Arc<dyn OutgoingSink>) -> Arc<dyn ProtocolCodec> {
        Arc::new(OpCodec::new(client_id, sink))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Vec<u8>>>,
        fail_with: Option<SinkError>,
    }

    #[async_trait]
    impl OutgoingSink for RecordingSink {
        async fn send(&self, bytes: Vec<u8>) -> Result<(), SinkError> {
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.frames.lock().unwrap().push(bytes);
            Ok(())
        }
    }

    fn frame_json(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).expect("reply must be JSON")
    }

    #[tokio::test]
    async fn test_ping_with_id_is_answered_with_pong() {
        // Arrange
        let sink = Arc::new(RecordingSink::default());
        let codec = OpCodec::new(ClientId(1), sink.clone());

        // Act
        codec.incoming(r#"{"op":"ping","id":"p-1"}"#).await.unwrap();

        // Assert
        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], br#"{"op":"pong","id":"p-1"}"#);
    }

    #[tokio::test]
    async fn test_ping_without_id_omits_id() {
        let sink = Arc::new(RecordingSink::default());
        let codec = OpCodec::new(ClientId(1), sink.clone());

        codec.incoming(r#"{"op":"ping"}"#).await.unwrap();

        assert_eq!(sink.frames.lock().unwrap()[0], br#"{"op":"pong"}"#);
    }

    #[tokio::test]
    async fn test_unknown_op_is_answered_with_status_error() {
        let sink = Arc::new(RecordingSink::default());
        let codec = OpCodec::new(ClientId(1), sink.clone());

        codec.incoming(r#"{"op":"advertise","id":3}"#).await.unwrap();

        let reply = frame_json(&sink.frames.lock().unwrap()[0]);
        assert_eq!(reply["op"], "status");
        assert_eq!(reply["level"], "error");
        assert_eq!(reply["id"], 3);
        assert_eq!(reply["msg"], "unsupported op: advertise");
    }

    #[tokio::test]
    async fn test_malformed_frame_does_not_return_error() {
        // Arrange: not JSON at all
        let sink = Arc::new(RecordingSink::default());
        let codec = OpCodec::new(ClientId(1), sink.clone());

        // Act
        let result = codec.incoming("not json").await;

        // Assert: answered in-band, not escalated
        assert!(result.is_ok());
        let reply = frame_json(&sink.frames.lock().unwrap()[0]);
        assert_eq!(reply["op"], "status");
    }

    #[tokio::test]
    async fn test_missing_op_is_malformed() {
        let sink = Arc::new(RecordingSink::default());
        let codec = OpCodec::new(ClientId(1), sink.clone());

        codec.incoming(r#"{"id":1}"#).await.unwrap();

        let reply = frame_json(&sink.frames.lock().unwrap()[0]);
        assert_eq!(reply["op"], "status");
        assert!(reply["msg"].as_str().unwrap().starts_with("malformed frame"));
    }

    #[tokio::test]
    async fn test_sink_failure_propagates_to_caller() {
        // Arrange
        let sink = Arc::new(RecordingSink {
            frames: Mutex::new(Vec::new()),
            fail_with: Some(SinkError::Delivery("service down".to_string())),
        });
        let codec = OpCodec::new(ClientId(1), sink);

        // Act
        let result = codec.incoming(r#"{"op":"ping"}"#).await;

        // Assert
        assert!(matches!(
            result,
            Err(CodecError::Sink(SinkError::Delivery(ref m))) if m == "service down"
        ));
    }

    #[tokio::test]
    async fn test_incoming_after_finish_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let codec = OpCodec::new(ClientId(1), sink.clone());

        codec.finish();
        codec.finish();
        let result = codec.incoming(r#"{"op":"ping"}"#).await;

        assert!(matches!(result, Err(CodecError::Finished)));
        assert!(sink.frames.lock().unwrap().is_empty());
    }
}
