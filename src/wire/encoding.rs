use async_trait::async_trait;
use prost::{bytes::BufMut, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BytesBus, Messenger, WireError};
use crate::{
    messages::{MessageBody, ProtocolMessage, ProtocolName, ProtocolParams, SyncSnapshot},
    sig::PublicIdentifier,
    Signature,
};

/// Largest encoded envelope a frame can carry. Sync snapshots of channels
/// with many apps run to hundreds of kilobytes.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

/// Protobuf envelope of a [ProtocolMessage]. Signatures travel as raw bytes,
/// the rest of the body as JSON.
#[derive(Clone, PartialEq, Message)]
pub struct WireEnvelope {
    #[prost(bytes = "vec", tag = "1")]
    pub process_id: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub protocol: u32,
    #[prost(uint32, tag = "3")]
    pub seq: u32,
    #[prost(bytes = "vec", tag = "4")]
    pub sender: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub recipient: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "6")]
    pub signatures: Vec<Vec<u8>>,
    #[prost(bytes = "vec", tag = "7")]
    pub payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Payload {
    Init { params: ProtocolParams },
    Countersignature,
    Snapshot(Box<SyncSnapshot>),
    Rejection { reason: String, busy: bool },
}

#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

/// Framing: a u32 big-endian length followed by the protobuf
/// envelope (not `encode_length_delimited`, which uses LEB128).
pub fn encode_frame(msg: &ProtocolMessage) -> Result<Vec<u8>, WireError> {
    let (signatures, payload) = match &msg.body {
        MessageBody::Init { params, signatures } => (
            signatures.as_slice(),
            Payload::Init {
                params: params.clone(),
            },
        ),
        MessageBody::Countersignature { signatures } => {
            (signatures.as_slice(), Payload::Countersignature)
        }
        MessageBody::Snapshot(s) => (&[][..], Payload::Snapshot(s.clone())),
        MessageBody::Rejection { reason, busy } => (
            &[][..],
            Payload::Rejection {
                reason: reason.clone(),
                busy: *busy,
            },
        ),
    };
    let envelope = WireEnvelope {
        process_id: msg.process_id.as_bytes().to_vec(),
        protocol: msg.protocol as u32,
        seq: msg.seq.into(),
        sender: msg.from.as_bytes().to_vec(),
        recipient: msg.to.as_bytes().to_vec(),
        signatures: signatures.iter().map(|s| s.0.to_vec()).collect(),
        payload: serde_json::to_vec(&payload)?,
    };

    let len = envelope.encoded_len();
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut buf = Vec::with_capacity(PREFIX_LEN + len);
    buf.put_slice(&(len as u32).to_be_bytes());
    envelope.encode(&mut buf)?;
    Ok(buf)
}

pub fn decode_frame(frame: &[u8]) -> Result<ProtocolMessage, WireError> {
    if frame.len() < PREFIX_LEN {
        return Err(WireError::Truncated {
            expected: PREFIX_LEN,
            actual: frame.len(),
        });
    }
    let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let body = &frame[PREFIX_LEN..];
    if body.len() != len {
        return Err(WireError::Truncated {
            expected: len,
            actual: body.len(),
        });
    }
    let envelope = WireEnvelope::decode(body)?;

    let process_id = Uuid::from_slice(&envelope.process_id)
        .map_err(|e| WireError::Malformed(format!("process id: {}", e)))?;
    let protocol = u8::try_from(envelope.protocol)
        .ok()
        .and_then(ProtocolName::from_u8)
        .ok_or_else(|| WireError::Malformed(format!("unknown protocol {}", envelope.protocol)))?;
    let seq = u8::try_from(envelope.seq)
        .map_err(|_| WireError::Malformed(format!("sequence number {}", envelope.seq)))?;
    let from = identifier(&envelope.sender)?;
    let to = identifier(&envelope.recipient)?;
    let signatures = envelope
        .signatures
        .iter()
        .map(|s| Signature::from_slice(s).map_err(|e| WireError::Malformed(e.to_string())))
        .collect::<Result<Vec<_>, _>>()?;

    let body = match serde_json::from_slice(&envelope.payload)? {
        Payload::Init { params } => MessageBody::Init { params, signatures },
        Payload::Countersignature => MessageBody::Countersignature { signatures },
        Payload::Snapshot(s) => MessageBody::Snapshot(s),
        Payload::Rejection { reason, busy } => MessageBody::Rejection { reason, busy },
    };
    Ok(ProtocolMessage {
        process_id,
        protocol,
        seq,
        from,
        to,
        body,
    })
}

fn identifier(bytes: &[u8]) -> Result<PublicIdentifier, WireError> {
    PublicIdentifier::from_sec1_bytes(bytes).map_err(|e| WireError::Malformed(e.to_string()))
}

#[async_trait]
impl<B: BytesBus> Messenger for ProtoBufEncodingLayer<B> {
    async fn send(&self, msg: ProtocolMessage) -> Result<(), WireError> {
        let buf = encode_frame(&msg)?;
        self.bus.send_to_participant(&msg.to, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{channel::tests::two_identifiers, messages::SEQ_INIT, Address, Hash};

    fn message(body: MessageBody) -> ProtocolMessage {
        let [from, to] = two_identifiers();
        ProtocolMessage {
            process_id: Uuid::new_v4(),
            protocol: ProtocolName::Install,
            seq: SEQ_INIT,
            from,
            to,
            body,
        }
    }

    #[test]
    fn frame_starts_with_big_endian_length() {
        let msg = message(MessageBody::Init {
            params: ProtocolParams::Install {
                multisig_address: Address([1; 20]),
                identity_hash: Hash([2; 32]),
                free_balance_version: 1,
            },
            signatures: vec![Signature([3; 65]), Signature([4; 65])],
        });
        let frame = encode_frame(&msg).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(decode_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn rejection_keeps_busy_flag() {
        let msg = message(MessageBody::Rejection {
            reason: "busy".into(),
            busy: true,
        });
        let back = decode_frame(&encode_frame(&msg).unwrap()).unwrap();
        assert!(matches!(back.body, MessageBody::Rejection { busy: true, .. }));
    }

    #[test]
    fn truncated_and_garbage_frames_are_rejected() {
        let msg = message(MessageBody::Countersignature { signatures: vec![] });
        let frame = encode_frame(&msg).unwrap();
        assert!(matches!(
            decode_frame(&frame[..frame.len() - 1]),
            Err(WireError::Truncated { .. })
        ));
        assert!(matches!(decode_frame(&[0, 0, 0]), Err(WireError::Truncated { .. })));
        assert!(decode_frame(&[0, 0, 0, 3, 0xff, 0xff, 0xff]).is_err());
        assert!(matches!(
            decode_frame(&[0xff, 0xff, 0xff, 0xff]),
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn frames_larger_than_a_u16_length_fit() {
        let msg = message(MessageBody::Rejection {
            reason: "x".repeat(100_000),
            busy: false,
        });
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn oversized_messages_are_an_error() {
        let msg = message(MessageBody::Rejection {
            reason: "x".repeat(MAX_FRAME_LEN),
            busy: false,
        });
        assert!(matches!(encode_frame(&msg), Err(WireError::FrameTooLarge(_))));
    }
}
