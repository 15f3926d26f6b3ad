//! Outbound message channel toward the control-channel writer.

use rlncd_core::types::{FlowKey, FrameType, MeshAddr, Outbound};
use tokio::sync::mpsc;

/// Cloneable sending half of the outbound channel.
///
/// Sends never block: the writer task serializes actual transmission. A
/// closed channel (daemon shutting down) silently drops messages.
#[derive(Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundSink {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// A sink plus its receiving half, for tests and daemon wiring.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, msg: Outbound) {
        if self.tx.send(msg).is_err() {
            tracing::debug!("outbound channel closed, dropping message");
        }
    }

    pub fn send_frame(&self, key: FlowKey, frame_type: FrameType, payload: Vec<u8>) {
        self.send(Outbound::Frame {
            key,
            frame_type,
            payload,
        });
    }

    pub fn send_decoded(&self, payload: Vec<u8>) {
        self.send(Outbound::Decoded { payload });
    }

    pub fn send_ack(&self, key: FlowKey) {
        self.send(Outbound::Ack { key });
    }

    pub fn send_req(&self, key: FlowKey, rank: u16, seq: u16) {
        self.send(Outbound::Req { key, rank, seq });
    }

    pub fn send_block(&self) {
        self.send(Outbound::Block);
    }

    pub fn send_unblock(&self) {
        self.send(Outbound::Unblock);
    }

    pub fn read_link(&self, addr: MeshAddr) {
        self.send(Outbound::ReadLink { addr });
    }

    pub fn read_one_hops(&self, dst: MeshAddr) {
        self.send(Outbound::ReadOneHops { dst });
    }

    pub fn read_relays(&self, src: MeshAddr, dst: MeshAddr) {
        self.send(Outbound::ReadRelays { src, dst });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FlowKey {
        FlowKey::new(MeshAddr::new([1; 6]), MeshAddr::new([2; 6]), 3)
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (sink, mut rx) = OutboundSink::channel();
        sink.send_block();
        sink.send_ack(key());
        sink.send_unblock();

        assert_eq!(rx.recv().await, Some(Outbound::Block));
        assert_eq!(rx.recv().await, Some(Outbound::Ack { key: key() }));
        assert_eq!(rx.recv().await, Some(Outbound::Unblock));
    }

    #[tokio::test]
    async fn closed_channel_drops_silently() {
        let (sink, rx) = OutboundSink::channel();
        drop(rx);
        // Must not panic.
        sink.send_req(key(), 4, 1);
    }
}
