//! The transport owns the single UDP socket that all circuits share. Its receive loop hands
//!  each datagram to the circuit for the sender's endpoint, and its send loop pumps the packets
//!  that circuits queue.
//!
//! Datagrams from endpoints without a circuit are dropped: circuits are created explicitly by
//!  the application through [Transport::enable_circuit].

pub mod datagram_socket;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, span, trace, Level};
use uuid::Uuid;

use crate::circuit::{Circuit, CircuitState, InboundDatagram};
use crate::config::TransportConfig;
use crate::error::CircuitError;
use crate::event_handler::CircuitEventHandler;
use crate::message_registry::MessageRegistry;
use crate::util::atomic_map::AtomicMap;
use datagram_socket::DatagramSocket;

/// A fully encoded packet, queued by a circuit for the transport's send loop
#[derive(Debug, Clone)]
pub struct OutboundPacket {
    pub to: SocketAddr,
    pub buf: Bytes,
}

pub struct Transport {
    config: TransportConfig,
    socket: Arc<dyn DatagramSocket>,
    circuits: Arc<AtomicMap<SocketAddr, Arc<Circuit>>>,
    registry: Arc<MessageRegistry>,
    event_handler: Arc<dyn CircuitEventHandler>,
    outbound_sender: mpsc::UnboundedSender<OutboundPacket>,
    outbound_receiver: Mutex<Option<mpsc::UnboundedReceiver<OutboundPacket>>>,
    cancel: CancellationToken,
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Transport {
    /// Binds the UDP socket. The transport does not receive or send until [Transport::start]
    ///  is called.
    pub async fn bind(
        config: TransportConfig,
        registry: Arc<MessageRegistry>,
        event_handler: Arc<dyn CircuitEventHandler>,
    ) -> anyhow::Result<Transport> {
        config.validate()?;

        let socket = UdpSocket::bind(config.local_addr).await?;
        info!("bound socket to {:?}", socket.local_addr()?);

        Transport::new(config, Arc::new(socket), registry, event_handler)
    }

    pub fn new(
        config: TransportConfig,
        socket: Arc<dyn DatagramSocket>,
        registry: Arc<MessageRegistry>,
        event_handler: Arc<dyn CircuitEventHandler>,
    ) -> anyhow::Result<Transport> {
        config.validate()?;

        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
        Ok(Transport {
            config,
            socket,
            circuits: Default::default(),
            registry,
            event_handler,
            outbound_sender,
            outbound_receiver: Mutex::new(Some(outbound_receiver)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn registry(&self) -> &Arc<MessageRegistry> {
        &self.registry
    }

    /// Spawns the receive and send loops. Subsequent calls have no effect.
    pub async fn start(&self) {
        let Some(outbound_receiver) = self.outbound_receiver.lock().await.take() else {
            debug!("transport is already started");
            return;
        };

        tokio::spawn(Self::send_loop(self.socket.clone(), outbound_receiver, self.cancel.clone()));
        tokio::spawn(Self::recv_loop(self.socket.clone(), self.circuits.clone(), self.config.receive_buffer_size, self.cancel.clone()));
    }

    /// Returns the circuit for the remote endpoint, creating and starting it if there is none.
    ///  The timing parameters only apply to a newly created circuit, and they are validated
    ///  only then. A circuit that was stopped (e.g. after a circuit timeout) is replaced by a
    ///  fresh one.
    pub async fn enable_circuit(&self, remote: SocketAddr, heartbeat_interval: Duration, circuit_timeout: Duration) -> Result<Arc<Circuit>, CircuitError> {
        if self.cancel.is_cancelled() {
            return Err(CircuitError::TransportClosed(remote));
        }

        let existing = self.circuits.get(&remote);
        if let Some(circuit) = &existing {
            if circuit.state().await != CircuitState::Stopped {
                return Ok(circuit.clone());
            }
        }

        let config = self.config.circuit.with_timing(heartbeat_interval, circuit_timeout);
        let (circuit, created) = self.circuits.update(|circuits| -> Result<_, CircuitError> {
            match circuits.get(&remote) {
                // a concurrent call got there first
                Some(current) if !existing.as_ref().is_some_and(|e| Arc::ptr_eq(e, current)) => Ok((current.clone(), false)),
                _ => {
                    let circuit = Circuit::new(remote, config, self.outbound_sender.clone(), self.registry.clone(), self.event_handler.clone())?;
                    circuits.insert(remote, circuit.clone());
                    Ok((circuit, true))
                }
            }
        })?;

        if created {
            info!("enabled circuit to {}", remote);
            circuit.start().await;
        }
        Ok(circuit)
    }

    pub fn circuit(&self, remote: &SocketAddr) -> Option<Arc<Circuit>> {
        self.circuits.get(remote)
    }

    /// Stops the circuit and removes it. Returns `false` if there was no circuit for the endpoint.
    pub async fn disable_circuit(&self, remote: &SocketAddr) -> bool {
        let Some(circuit) = self.circuits.update(|circuits| circuits.remove(remote)) else {
            return false;
        };
        info!("disabled circuit to {}", remote);
        circuit.stop().await;
        true
    }

    /// Stops all circuits and the transport's loops
    pub async fn shutdown(&self) {
        info!("shutting down transport");
        self.cancel.cancel();

        let circuits = self.circuits.update(std::mem::take);
        for circuit in circuits.values() {
            circuit.stop().await;
        }
    }

    async fn send_loop(socket: Arc<dyn DatagramSocket>, mut outbound: mpsc::UnboundedReceiver<OutboundPacket>, cancel: CancellationToken) {
        info!("starting send loop");
        loop {
            let packet = select! {
                _ = cancel.cancelled() => break,
                packet = outbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
            };

            trace!("sending {} bytes to {:?}", packet.buf.len(), packet.to);
            if let Err(e) = socket.send_to(&packet.buf, packet.to).await {
                error!("error sending UDP packet to {:?}: {}", packet.to, e);
            }
        }
        debug!("send loop finished");
    }

    async fn recv_loop(socket: Arc<dyn DatagramSocket>, circuits: Arc<AtomicMap<SocketAddr, Arc<Circuit>>>, buf_size: usize, cancel: CancellationToken) {
        info!("starting receive loop");

        let mut buf = vec![0u8; buf_size];
        loop {
            let (num_read, from) = select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(x) => x,
                    Err(e) => {
                        error!("socket error: {}", e);
                        continue;
                    }
                },
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "packet_received", ?correlation_id);
            span.in_scope(|| {
                trace!("received {} bytes from {:?}", num_read, from);

                match circuits.get(&from) {
                    Some(circuit) => circuit.enqueue_inbound(InboundDatagram {
                        data: Bytes::copy_from_slice(&buf[..num_read]),
                        span: span.clone(),
                    }),
                    None => debug!("datagram from {:?} without a circuit - dropping", from),
                }
            });
        }
        debug!("receive loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time;
    use crate::codec::{BufExt, StringLength};
    use crate::config::CircuitConfig;
    use crate::error::CodecResult;
    use crate::event_handler::{ChannelEventHandler, CircuitEvent};
    use crate::message_registry::DecodedPayload;
    use crate::packet::{Message, MessageId, Packet, PacketFlags};
    use crate::test_util::{peer_packet, test_addr};
    use datagram_socket::MockDatagramSocket;

    fn mock_transport() -> (Transport, mpsc::UnboundedReceiver<CircuitEvent>) {
        let (handler, events) = ChannelEventHandler::new();
        let transport = Transport::new(TransportConfig::default(), Arc::new(MockDatagramSocket::new()), Arc::new(MessageRegistry::new()), Arc::new(handler)).unwrap();
        (transport, events)
    }

    fn loopback_config() -> TransportConfig {
        TransportConfig {
            local_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            circuit: CircuitConfig {
                ack_coalesce_threshold: Duration::from_millis(50),
                ..CircuitConfig::default()
            },
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn test_send_loop_sends_queued_packets() {
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let num_calls = Arc::new(AtomicUsize::new(0));

        let mut socket = MockDatagramSocket::new();
        let sent_clone = sent.clone();
        let num_calls_clone = num_calls.clone();
        socket.expect_send_to()
            .times(3)
            .returning(move |buf, to| {
                // the second send fails, which must not stop the loop
                if num_calls_clone.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
                }
                sent_clone.lock().unwrap().push((buf.to_vec(), to));
                Ok(buf.len())
            });

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Transport::send_loop(Arc::new(socket), receiver, CancellationToken::new()));

        sender.send(OutboundPacket { to: test_addr(1), buf: Bytes::from_static(&[1, 2, 3]) }).unwrap();
        sender.send(OutboundPacket { to: test_addr(2), buf: Bytes::from_static(&[4]) }).unwrap();
        sender.send(OutboundPacket { to: test_addr(3), buf: Bytes::from_static(&[5]) }).unwrap();
        drop(sender);
        handle.await.unwrap();

        assert_eq!(num_calls.load(Ordering::SeqCst), 3);
        assert_eq!(*sent.lock().unwrap(), vec![
            (vec![1u8, 2, 3], test_addr(1)),
            (vec![5u8], test_addr(3)),
        ]);
    }

    #[tokio::test]
    async fn test_send_loop_stops_on_cancel() {
        let (_sender, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Transport::send_loop(Arc::new(MockDatagramSocket::new()), receiver, cancel.clone()));

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_enable_circuit_is_idempotent() {
        let (transport, _events) = mock_transport();

        let a = transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        let b = transport.enable_circuit(test_addr(1), Duration::from_secs(1), Duration::from_secs(2)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state().await, CircuitState::Running);
        assert_eq!(a.config().heartbeat_interval, Duration::from_secs(5));

        let other = transport.enable_circuit(test_addr(2), Duration::from_secs(1), Duration::from_secs(2)).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(other.config().circuit_timeout, Duration::from_secs(2));

        assert!(Arc::ptr_eq(&transport.circuit(&test_addr(1)).unwrap(), &a));
        assert!(transport.circuit(&test_addr(3)).is_none());
    }

    #[tokio::test]
    async fn test_enable_circuit_replaces_stopped_circuit() {
        let (transport, _events) = mock_transport();

        let a = transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        a.stop().await;

        let b = transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.state().await, CircuitState::Running);
    }

    #[tokio::test]
    async fn test_disable_circuit() {
        let (transport, _events) = mock_transport();

        let circuit = transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        assert!(transport.disable_circuit(&test_addr(1)).await);
        assert!(!transport.disable_circuit(&test_addr(1)).await);

        assert!(transport.circuit(&test_addr(1)).is_none());
        assert_eq!(circuit.state().await, CircuitState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let (transport, _events) = mock_transport();
        let circuit = transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();

        transport.shutdown().await;
        assert_eq!(circuit.state().await, CircuitState::Stopped);
        assert!(transport.circuit(&test_addr(1)).is_none());
        assert!(matches!(
            transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await,
            Err(CircuitError::TransportClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let (handler, _events) = ChannelEventHandler::new();
        let config = TransportConfig {
            circuit: CircuitConfig { mtu: 10, ..CircuitConfig::default() },
            ..loopback_config()
        };
        assert!(Transport::bind(config, Arc::new(MessageRegistry::new()), Arc::new(handler)).await.is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let (handler, _events) = ChannelEventHandler::new();
        let config = TransportConfig {
            circuit: CircuitConfig { mtu: 10, ..CircuitConfig::default() },
            ..TransportConfig::default()
        };
        assert!(Transport::new(config, Arc::new(MockDatagramSocket::new()), Arc::new(MessageRegistry::new()), Arc::new(handler)).is_err());
    }

    #[tokio::test]
    async fn test_enable_circuit_rejects_invalid_timing() {
        let (transport, _events) = mock_transport();

        assert!(matches!(
            transport.enable_circuit(test_addr(1), Duration::ZERO, Duration::from_secs(100)).await,
            Err(CircuitError::InvalidConfig(_))
        ));
        assert!(matches!(
            transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(1)).await,
            Err(CircuitError::InvalidConfig(_))
        ));
        assert!(transport.circuit(&test_addr(1)).is_none());

        // a valid request for the same endpoint still works
        let circuit = transport.enable_circuit(test_addr(1), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        assert_eq!(circuit.state().await, CircuitState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enabled_circuit_flushes_owed_acks() {
        let (transport, _events) = mock_transport();
        let mut outbound = transport.outbound_receiver.lock().await.take().unwrap();

        let circuit = transport.enable_circuit(test_addr(1), Duration::from_secs(1), Duration::from_secs(100)).await.unwrap();
        circuit.receive_data(&peer_packet(PacketFlags::RELIABLE, 7, &Message::new(MessageId::High(4), vec![1u8]), &[])).await;

        time::sleep(Duration::from_secs(5)).await;
        let sent = outbound.try_recv().unwrap();
        assert_eq!(sent.to, test_addr(1));
        assert_eq!(Packet::decode(&sent.buf).unwrap().message_id, MessageId::PACKET_ACK);
        assert!(circuit.pending_outbound_acks().await.is_empty());
    }

    #[derive(Debug, PartialEq)]
    struct ChatMessage {
        channel: u8,
        text: String,
    }

    fn chat_decoder(buf: &mut Bytes) -> CodecResult<DecodedPayload> {
        let channel = buf.read_u8()?;
        let text = buf.read_string(StringLength::U8Prefixed)?;
        Ok(Arc::new(ChatMessage { channel, text }))
    }

    #[tokio::test]
    async fn test_reliable_message_over_loopback() {
        let (a_handler, mut a_events) = ChannelEventHandler::new();
        let (b_handler, mut b_events) = ChannelEventHandler::new();
        let b_registry = Arc::new(MessageRegistry::new());
        b_registry.register(MessageId::Low(80), chat_decoder);

        let a = Transport::bind(loopback_config(), Arc::new(MessageRegistry::new()), Arc::new(a_handler)).await.unwrap();
        let b = Transport::bind(loopback_config(), b_registry, Arc::new(b_handler)).await.unwrap();
        a.start().await;
        b.start().await;
        let a_addr = a.local_addr().unwrap();
        let b_addr = b.local_addr().unwrap();

        let a_to_b = a.enable_circuit(b_addr, Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        let b_to_a = b.enable_circuit(a_addr, Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();

        let message = Message::zerocoded(MessageId::Low(80), vec![3u8, 6, b'h', b'e', b'l', b'l', b'o', 0]);
        let sequence = a_to_b.send_reliable(&message).await.unwrap();
        assert_eq!(sequence, 1);
        assert!(a_to_b.awaiting_peer_ack().await.is_empty());

        match b_events.recv().await {
            Some(CircuitEvent::Message { peer, message }) => {
                assert_eq!(peer, a_addr);
                assert_eq!(message.id, MessageId::Low(80));
                assert_eq!(message.payload.downcast_ref::<ChatMessage>(), Some(&ChatMessage { channel: 3, text: "hello".to_string() }));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(a_events.recv().await, Some(CircuitEvent::Ack { sequence: 1, .. })));
        assert!(b_to_a.pending_outbound_acks().await.is_empty());

        a.shutdown().await;
        b.shutdown().await;
    }

    #[tokio::test]
    async fn test_datagrams_from_unknown_endpoints_are_dropped() {
        let (handler, mut events) = ChannelEventHandler::new();
        let transport = Transport::bind(loopback_config(), Arc::new(MessageRegistry::new()), Arc::new(handler)).await.unwrap();
        transport.start().await;
        let transport_addr = transport.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = peer_packet(PacketFlags::empty(), 1, &Message::new(MessageId::High(4), vec![1u8]), &[]);

        peer.send_to(&packet, transport_addr).await.unwrap();
        assert!(time::timeout(Duration::from_millis(200), events.recv()).await.is_err());

        transport.enable_circuit(peer.local_addr().unwrap(), Duration::from_secs(5), Duration::from_secs(100)).await.unwrap();
        peer.send_to(&packet, transport_addr).await.unwrap();
        match time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(CircuitEvent::Message { peer: from, message })) => {
                assert_eq!(from, peer.local_addr().unwrap());
                assert_eq!(message.sequence, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
