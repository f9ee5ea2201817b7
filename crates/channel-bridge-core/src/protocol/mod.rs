//! Protocol module containing the bus message shapes and the text protocol codec.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, CodecFactory, OpCodec, OpCodecFactory, OutgoingSink, ProtocolCodec, SinkError};
pub use messages::*;
