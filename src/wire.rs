//! Messaging collaborator.
//!
//! The engine hands [ProtocolMessage]s to a [Messenger]. The provided
//! [ProtoBufEncodingLayer] turns them into length-prefixed protobuf frames and
//! passes the bytes to a transport implementing [BytesBus].

mod encoding;
mod memory;

use core::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

pub use encoding::{decode_frame, encode_frame, ProtoBufEncodingLayer, WireEnvelope, MAX_FRAME_LEN};
pub use memory::{MemoryBus, MemoryNetwork};

use crate::{messages::ProtocolMessage, sig::PublicIdentifier};

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encoded message of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("protobuf decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("protobuf encode: {0}")]
    Encode(#[from] prost::EncodeError),
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("no route to {0}")]
    Unreachable(PublicIdentifier),
    #[error("transport closed")]
    Closed,
}

impl From<serde_json::Error> for WireError {
    fn from(e: serde_json::Error) -> Self {
        WireError::Malformed(e.to_string())
    }
}

/// Byte level transport, point-to-point by recipient identifier.
pub trait BytesBus: Debug + Send + Sync {
    fn send_to_participant(&self, recipient: &PublicIdentifier, frame: &[u8]) -> Result<(), WireError>;
}

/// Delivery of protocol messages to the counterparty. Delivery is not
/// guaranteed: lost messages surface as protocol timeouts.
#[async_trait]
pub trait Messenger: Debug + Send + Sync {
    async fn send(&self, msg: ProtocolMessage) -> Result<(), WireError>;
}
