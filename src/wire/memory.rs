use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{decode_frame, BytesBus, ProtoBufEncodingLayer, WireError};
use crate::{messages::ProtocolMessage, sig::PublicIdentifier};

type DropFilter = Arc<dyn Fn(&ProtocolMessage) -> bool + Send + Sync>;

#[derive(Default)]
struct Inner {
    inboxes: Mutex<HashMap<PublicIdentifier, mpsc::UnboundedSender<Vec<u8>>>>,
    drop_filter: Mutex<Option<DropFilter>>,
    dropped: AtomicUsize,
}

/// In-process network connecting any number of nodes. Frames are delivered
/// in order, unless a drop filter says a message is lost.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("nodes", &self.inner.inboxes.lock().len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` on the network. Returns the messenger the node sends
    /// with and the inbox it receives frames on.
    pub fn connect(
        &self,
        id: PublicIdentifier,
    ) -> (ProtoBufEncodingLayer<MemoryBus>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.inboxes.lock().insert(id, tx);
        let bus = MemoryBus {
            network: self.clone(),
        };
        (ProtoBufEncodingLayer::new(bus), rx)
    }

    /// Silently lose every message for which `filter` returns true.
    pub fn set_drop_filter(&self, filter: impl Fn(&ProtocolMessage) -> bool + Send + Sync + 'static) {
        *self.inner.drop_filter.lock() = Some(Arc::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        *self.inner.drop_filter.lock() = None;
    }

    /// Number of messages lost to the drop filter so far.
    pub fn dropped(&self) -> usize {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBus {
    network: MemoryNetwork,
}

impl BytesBus for MemoryBus {
    fn send_to_participant(&self, recipient: &PublicIdentifier, frame: &[u8]) -> Result<(), WireError> {
        let inner = &self.network.inner;
        let filter = inner.drop_filter.lock().clone();
        if let Some(filter) = filter {
            let msg = decode_frame(frame)?;
            if filter(&msg) {
                inner.dropped.fetch_add(1, Ordering::SeqCst);
                debug!(process_id = %msg.process_id, protocol = ?msg.protocol, seq = msg.seq, "message lost");
                return Ok(());
            }
        }

        let inboxes = inner.inboxes.lock();
        let inbox = inboxes
            .get(recipient)
            .ok_or(WireError::Unreachable(*recipient))?;
        inbox.send(frame.to_vec()).map_err(|_| WireError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        channel::tests::two_identifiers,
        messages::{MessageBody, ProtocolName, SEQ_REPLY},
        wire::Messenger,
    };

    fn reply(from: PublicIdentifier, to: PublicIdentifier) -> ProtocolMessage {
        ProtocolMessage {
            process_id: Uuid::new_v4(),
            protocol: ProtocolName::Setup,
            seq: SEQ_REPLY,
            from,
            to,
            body: MessageBody::Countersignature { signatures: vec![] },
        }
    }

    #[tokio::test]
    async fn frames_reach_the_recipient() {
        let [a, b] = two_identifiers();
        let net = MemoryNetwork::new();
        let (a_out, _a_in) = net.connect(a);
        let (_b_out, mut b_in) = net.connect(b);

        let msg = reply(a, b);
        a_out.send(msg.clone()).await.unwrap();
        let frame = b_in.recv().await.unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), msg);
    }

    #[tokio::test]
    async fn filtered_messages_are_lost() {
        let [a, b] = two_identifiers();
        let net = MemoryNetwork::new();
        let (a_out, _a_in) = net.connect(a);
        let (_b_out, mut b_in) = net.connect(b);

        net.set_drop_filter(|m| m.seq == SEQ_REPLY);
        a_out.send(reply(a, b)).await.unwrap();
        assert_eq!(net.dropped(), 1);
        assert!(b_in.try_recv().is_err());

        net.clear_drop_filter();
        a_out.send(reply(a, b)).await.unwrap();
        assert!(b_in.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unknown_recipient_is_unreachable() {
        let [a, b] = two_identifiers();
        let net = MemoryNetwork::new();
        let (a_out, _a_in) = net.connect(a);
        assert!(matches!(
            a_out.send(reply(a, b)).await,
            Err(WireError::Unreachable(id)) if id == b
        ));
    }
}
