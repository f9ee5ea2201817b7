//! Message shapes carried on the pub/sub bus.
//!
//! Only two shapes exist:
//!
//! - [`DataMessage`] – one chunk of data-channel traffic, published on the
//!   bridge's inbound topic and embedded in every outbound request.
//! - [`SendDataRequest`] – the request of the outbound `send_data` call,
//!   addressing a [`DataMessage`] to a `(session, peer)` pair.

use serde::{Deserialize, Serialize};

/// Well-known endpoint the bridge calls to push data toward the remote peer.
pub const SEND_DATA_ENDPOINT: &str = "send_data";

/// Inbound queue size used when the caller gives no hint.
pub const DEFAULT_QUEUE_SIZE: usize = 10;

/// Encoding tag describing how `DataMessage::data` should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Encoding {
    /// UTF-8 text.  The bridge always tags its outbound traffic with this.
    #[serde(rename = "utf-8")]
    Utf8,
    /// Opaque bytes.
    #[serde(rename = "binary")]
    Binary,
}

impl Encoding {
    /// The tag as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Binary => "binary",
        }
    }
}

/// One chunk of data-channel traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Data channel label the chunk belongs to.
    pub label: String,
    pub encoding: Encoding,
    pub data: Vec<u8>,
}

impl DataMessage {
    /// Builds a message tagged as UTF-8 text.
    pub fn text(label: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            label: label.into(),
            encoding: Encoding::Utf8,
            data: data.into(),
        }
    }

    /// Reconstructs the payload as a string.
    ///
    /// Valid UTF-8 is returned unchanged; invalid sequences are replaced with
    /// U+FFFD so the codec still sees (and can reject) the message.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Request of the outbound `send_data` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendDataRequest {
    pub session_id: String,
    pub peer_id: String,
    pub data: DataMessage,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
