//! Integration tests for the channel-bridge-core public API.
//!
//! These tests drive the reference codec the way the bridge does: through
//! [`CodecFactory`], with a sink that captures what would be handed to the
//! outbound call, and with the payload reconstructed from a [`DataMessage`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use channel_bridge_core::{
    BridgeIdentity, ClientId, CodecFactory, DataMessage, OpCodecFactory, OutgoingSink,
    SendDataRequest, SinkError,
};

/// Sink that wraps every frame in the request the bridge would send.
struct RequestCapture {
    identity: BridgeIdentity,
    requests: Mutex<Vec<SendDataRequest>>,
}

#[async_trait]
impl OutgoingSink for RequestCapture {
    async fn send(&self, bytes: Vec<u8>) -> Result<(), SinkError> {
        self.requests.lock().unwrap().push(SendDataRequest {
            session_id: self.identity.session_id.clone(),
            peer_id: self.identity.peer_id.clone(),
            data: DataMessage::text(self.identity.label.clone(), bytes),
        });
        Ok(())
    }
}

#[tokio::test]
async fn test_inbound_ping_message_produces_pong_request() {
    // Arrange
    let identity = BridgeIdentity::new("s1", "p1", "chat");
    let capture = Arc::new(RequestCapture {
        identity: identity.clone(),
        requests: Mutex::new(Vec::new()),
    });
    let codec = OpCodecFactory.create(ClientId(42), capture.clone());
    let inbound = DataMessage::text("chat", r#"{"op":"ping","id":1}"#);

    // Act
    codec.incoming(&inbound.payload_text()).await.unwrap();

    // Assert
    let requests = capture.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].session_id, "s1");
    assert_eq!(requests[0].peer_id, "p1");
    assert_eq!(requests[0].data.label, "chat");
    assert_eq!(requests[0].data.payload_text(), r#"{"op":"pong","id":1}"#);
}

#[tokio::test]
async fn test_each_frame_produces_exactly_one_reply_in_order() {
    let identity = BridgeIdentity::new("s1", "p1", "chat");
    let capture = Arc::new(RequestCapture {
        identity,
        requests: Mutex::new(Vec::new()),
    });
    let codec = OpCodecFactory.create(ClientId(7), capture.clone());

    for id in 0..5 {
        codec
            .incoming(&format!(r#"{{"op":"ping","id":{id}}}"#))
            .await
            .unwrap();
    }

    let replies: Vec<String> = capture
        .requests
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.data.payload_text())
        .collect();
    let expected: Vec<String> = (0..5)
        .map(|id| format!(r#"{{"op":"pong","id":{id}}}"#))
        .collect();
    assert_eq!(replies, expected);
}

#[test]
fn test_request_serializes_with_wire_encoding_tag() {
    let request = SendDataRequest {
        session_id: "s1".to_string(),
        peer_id: "p1".to_string(),
        data: DataMessage::text("chat", "x"),
    };

    let json = serde_json::to_value(&request).unwrap();

    assert_eq!(json["data"]["encoding"], "utf-8");
    assert_eq!(json["data"]["label"], "chat");
}
