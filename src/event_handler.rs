use std::net::SocketAddr;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::message_registry::MessagePayload;
use crate::packet::{MessageId, PacketFlags};

/// An inbound application message after framing and decoding
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub sequence: u32,
    pub flags: PacketFlags,
    pub payload: MessagePayload,
}

/// Callbacks from circuits to the application. They are called from the circuit's own task,
///  one at a time per circuit, so a slow handler delays only its own circuit.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CircuitEventHandler: Send + Sync + 'static {
    async fn on_message(&self, peer: SocketAddr, message: ReceivedMessage);

    /// The peer acknowledged a reliably sent packet. Called once per sequence number.
    async fn on_ack(&self, peer: SocketAddr, sequence: u32);

    /// Nothing was received from the peer for the circuit timeout. The circuit is stopped after
    ///  this call.
    async fn on_circuit_timeout(&self, peer: SocketAddr);
}

#[derive(Debug, Clone)]
pub enum CircuitEvent {
    Message {
        peer: SocketAddr,
        message: ReceivedMessage,
    },
    Ack {
        peer: SocketAddr,
        sequence: u32,
    },
    CircuitTimeout {
        peer: SocketAddr,
    },
}

/// Forwards all events into a channel, for applications that prefer pulling events over
///  implementing callbacks
pub struct ChannelEventHandler {
    sender: mpsc::UnboundedSender<CircuitEvent>,
}

impl ChannelEventHandler {
    pub fn new() -> (ChannelEventHandler, mpsc::UnboundedReceiver<CircuitEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelEventHandler { sender }, receiver)
    }

    fn forward(&self, event: CircuitEvent) {
        if self.sender.send(event).is_err() {
            debug!("event receiver was dropped - discarding event");
        }
    }
}

#[async_trait]
impl CircuitEventHandler for ChannelEventHandler {
    async fn on_message(&self, peer: SocketAddr, message: ReceivedMessage) {
        self.forward(CircuitEvent::Message { peer, message });
    }

    async fn on_ack(&self, peer: SocketAddr, sequence: u32) {
        self.forward(CircuitEvent::Ack { peer, sequence });
    }

    async fn on_circuit_timeout(&self, peer: SocketAddr) {
        self.forward(CircuitEvent::CircuitTimeout { peer });
    }
}
