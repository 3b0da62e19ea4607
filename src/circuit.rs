//! A circuit is the per-peer state of the protocol: outbound sequence numbers, reliably sent
//!  packets the peer has not acknowledged yet, and received packets this side still owes an
//!  ack for.
//!
//! Owed acks are piggybacked on outbound packets where they fit into the MTU. If nothing was
//!  sent for a while, the circuit's heartbeat task flushes them in a dedicated ack packet.
//!
//! Reliable sending waits for the ack and re-sends the packet (same sequence number, with the
//!  RESENT flag) with growing timeouts. When the last attempt times out, the send fails with
//!  [CircuitError::Timeout] and the circuit stops waiting for that ack; a late ack is ignored.

pub mod duplicate_filter;
pub mod resend_backoff;

use std::cmp::min;
use std::collections::{BTreeSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument, Span};

use crate::circuit::duplicate_filter::DuplicateFilter;
use crate::circuit::resend_backoff::ResendBackoff;
use crate::codec::BufExt;
use crate::config::CircuitConfig;
use crate::error::CircuitError;
use crate::event_handler::{CircuitEventHandler, ReceivedMessage};
use crate::message_registry::MessageRegistry;
use crate::packet::ack_block;
use crate::packet::{Message, MessageId, Packet, PacketFlags, PacketHeader};
use crate::transport::OutboundPacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// created, background tasks not started yet; sending and receiving work nonetheless
    Idle,
    Running,
    /// final: sends fail, received data is ignored
    Stopped,
}

/// A raw datagram queued for a circuit, together with the span it was received in
pub struct InboundDatagram {
    pub data: Bytes,
    pub span: Span,
}

struct CircuitInner {
    state: CircuitState,
    /// last issued sequence number, 0 before the first packet
    last_sequence: u32,
    awaiting_peer_ack: BTreeSet<u32>,
    pending_outbound_acks: VecDeque<u32>,
    duplicates: DuplicateFilter,
    last_send_time: Instant,
    last_receive_time: Instant,
    inbound_receiver: Option<mpsc::UnboundedReceiver<InboundDatagram>>,
}

impl CircuitInner {
    /// 0 is skipped on wrap-around since peers treat it as 'no sequence number'
    fn issue_sequence(&mut self) -> u32 {
        self.last_sequence = match self.last_sequence.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.last_sequence
    }
}

pub struct Circuit {
    peer_addr: SocketAddr,
    config: CircuitConfig,
    inner: Mutex<CircuitInner>,
    /// signalled whenever acks from the peer removed sequence numbers from `awaiting_peer_ack`
    ack_notify: Notify,
    outbound: mpsc::UnboundedSender<OutboundPacket>,
    inbound_sender: mpsc::UnboundedSender<InboundDatagram>,
    registry: Arc<MessageRegistry>,
    event_handler: Arc<dyn CircuitEventHandler>,
    cancel: CancellationToken,
}

impl Drop for Circuit {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Circuit {
    /// Fails with [CircuitError::InvalidConfig] if the configuration does not validate
    pub fn new(
        peer_addr: SocketAddr,
        config: CircuitConfig,
        outbound: mpsc::UnboundedSender<OutboundPacket>,
        registry: Arc<MessageRegistry>,
        event_handler: Arc<dyn CircuitEventHandler>,
    ) -> Result<Arc<Circuit>, CircuitError> {
        config.validate()
            .map_err(|e| CircuitError::InvalidConfig(format!("{:#}", e)))?;

        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
        let now = Instant::now();

        Ok(Arc::new(Circuit {
            peer_addr,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Idle,
                last_sequence: 0,
                awaiting_peer_ack: BTreeSet::default(),
                pending_outbound_acks: VecDeque::default(),
                duplicates: DuplicateFilter::new(config.duplicate_window),
                last_send_time: now,
                last_receive_time: now,
                inbound_receiver: Some(inbound_receiver),
            }),
            config,
            ack_notify: Notify::new(),
            outbound,
            inbound_sender,
            registry,
            event_handler,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn last_issued_sequence(&self) -> u32 {
        self.inner.lock().await.last_sequence
    }

    /// Sequence numbers sent reliably and not acknowledged by the peer yet, in ascending order
    pub async fn awaiting_peer_ack(&self) -> Vec<u32> {
        self.inner.lock().await.awaiting_peer_ack.iter().copied().collect()
    }

    /// Sequence numbers this side owes the peer an ack for, oldest first
    pub async fn pending_outbound_acks(&self) -> Vec<u32> {
        self.inner.lock().await.pending_outbound_acks.iter().copied().collect()
    }

    /// Starts the heartbeat and inbound processing tasks. Calling this on a running or stopped
    ///  circuit has no effect.
    pub async fn start(self: &Arc<Self>) {
        let inbound_receiver = {
            let mut inner = self.inner.lock().await;
            if inner.state != CircuitState::Idle {
                return;
            }
            inner.state = CircuitState::Running;
            inner.last_receive_time = Instant::now();
            inner.inbound_receiver.take()
        };

        debug!("starting circuit to {}", self.peer_addr);

        tokio::spawn(Self::heartbeat_loop(Arc::downgrade(self), self.cancel.clone()));
        if let Some(receiver) = inbound_receiver {
            tokio::spawn(Self::inbound_loop(Arc::downgrade(self), receiver, self.cancel.clone()));
        }
    }

    /// Stops the circuit's tasks and fails pending and future sends. Idempotent.
    pub async fn stop(&self) {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == CircuitState::Stopped {
                return;
            }
            inner.state = CircuitState::Stopped;
        }
        debug!("stopping circuit to {}", self.peer_addr);
        self.cancel.cancel();
        self.ack_notify.notify_waiters();
    }

    /// Queues a raw datagram for processing by the circuit's inbound task. Datagrams queued
    ///  before [Circuit::start] are processed once the circuit is started.
    pub fn enqueue_inbound(&self, datagram: InboundDatagram) {
        if self.inbound_sender.send(datagram).is_err() {
            debug!("inbound queue of circuit to {} is closed - dropping datagram", self.peer_addr);
        }
    }

    /// Sends a message without requiring an ack, returning its sequence number
    pub async fn send(&self, message: &Message) -> Result<u32, CircuitError> {
        self.send_packet(message, PacketFlags::empty(), None).await
    }

    /// Sends a message and waits for the peer to acknowledge it, re-sending it if necessary.
    ///  Returns the sequence number the message was sent with.
    pub async fn send_reliable(&self, message: &Message) -> Result<u32, CircuitError> {
        let sequence = self.send_packet(message, PacketFlags::RELIABLE, None).await?;

        match self.resend_until_acked(message, sequence).await {
            Ok(true) => {
                trace!("packet #{} was acknowledged by {}", sequence, self.peer_addr);
                return Ok(sequence);
            }
            Ok(false) => {}
            Err(e) => {
                self.inner.lock().await.awaiting_peer_ack.remove(&sequence);
                return Err(e);
            }
        }

        {
            let mut inner = self.inner.lock().await;
            if !inner.awaiting_peer_ack.remove(&sequence) {
                // the ack arrived between the last check and now
                return Ok(sequence);
            }
        }
        debug!("packet #{} to {} was not acknowledged in time", sequence, self.peer_addr);
        Err(CircuitError::Timeout {
            peer: self.peer_addr,
            sequence,
        })
    }

    /// `true` once the peer acknowledged the sequence number, `false` if all attempts timed out
    async fn resend_until_acked(&self, message: &Message, sequence: u32) -> Result<bool, CircuitError> {
        let mut backoff = ResendBackoff::new(&self.config);
        while let Some(timeout) = backoff.next_timeout() {
            if backoff.attempt() > 1 {
                debug!("re-sending packet #{} to {} (attempt {})", sequence, self.peer_addr, backoff.attempt());
                self.send_packet(message, PacketFlags::RELIABLE | PacketFlags::RESENT, Some(sequence)).await?;
            }

            if self.wait_for_ack(sequence, timeout).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Encodes and queues a packet. For a re-send, `resend_sequence` is the original sequence
    ///  number; nothing is sent if it was acknowledged in the meantime.
    async fn send_packet(&self, message: &Message, flags: PacketFlags, resend_sequence: Option<u32>) -> Result<u32, CircuitError> {
        let mut buf = Packet::encode_message(flags, 0, message)?;
        if buf.len() > self.config.mtu {
            return Err(CircuitError::MessageTooLarge {
                len: buf.len(),
                mtu: self.config.mtu,
            });
        }

        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Stopped {
            return Err(CircuitError::Stopped(self.peer_addr));
        }

        let sequence = match resend_sequence {
            Some(sequence) => {
                if !inner.awaiting_peer_ack.contains(&sequence) {
                    return Ok(sequence);
                }
                sequence
            }
            None => {
                let sequence = inner.issue_sequence();
                if flags.contains(PacketFlags::RELIABLE) {
                    inner.awaiting_peer_ack.insert(sequence);
                }
                sequence
            }
        };
        PacketHeader::patch_sequence(&mut buf, sequence);

        let piggyback = message.id != MessageId::PACKET_ACK;
        match self.transmit_locked(&mut inner, buf, piggyback) {
            Ok(()) => Ok(sequence),
            Err(e) => {
                if resend_sequence.is_none() {
                    inner.awaiting_peer_ack.remove(&sequence);
                }
                Err(e)
            }
        }
    }

    /// Appends owed acks that fit into the MTU and hands the packet to the transport. This
    ///  happens under the circuit's lock so packets leave in sequence number order.
    fn transmit_locked(&self, inner: &mut CircuitInner, mut buf: BytesMut, piggyback_acks: bool) -> Result<(), CircuitError> {
        let mut acks = Vec::new();
        if piggyback_acks && !inner.pending_outbound_acks.is_empty() {
            let num_acks = min(
                ack_block::acks_fitting(self.config.mtu - buf.len()),
                inner.pending_outbound_acks.len(),
            );
            acks.extend(inner.pending_outbound_acks.drain(..num_acks));
            ack_block::append_acks(&mut buf, &acks)?;
        }

        trace!("sending {} bytes to {} with {} acks", buf.len(), self.peer_addr, acks.len());
        let packet = OutboundPacket {
            to: self.peer_addr,
            buf: buf.freeze(),
        };
        if self.outbound.send(packet).is_err() {
            // put the acks back so they are not lost for the peer
            for &seq in acks.iter().rev() {
                inner.pending_outbound_acks.push_front(seq);
            }
            return Err(CircuitError::TransportClosed(self.peer_addr));
        }

        inner.last_send_time = Instant::now();
        Ok(())
    }

    /// `Ok(true)` if the sequence number was acknowledged, `Ok(false)` on timeout
    async fn wait_for_ack(&self, sequence: u32, timeout: Duration) -> Result<bool, CircuitError> {
        let deadline = Instant::now() + timeout;
        loop {
            // register for notifications before checking to avoid missing an ack in between
            let notified = self.ack_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().await;
                if inner.state == CircuitState::Stopped {
                    return Err(CircuitError::Stopped(self.peer_addr));
                }
                if !inner.awaiting_peer_ack.contains(&sequence) {
                    return Ok(true);
                }
            }

            select! {
                _ = &mut notified => {}
                _ = time::sleep_until(deadline) => {
                    let inner = self.inner.lock().await;
                    return Ok(!inner.awaiting_peer_ack.contains(&sequence));
                }
                _ = self.cancel.cancelled() => {
                    return Err(CircuitError::Stopped(self.peer_addr));
                }
            }
        }
    }

    /// Processes a raw datagram from the peer. Malformed packets are dropped without touching
    ///  circuit state.
    pub async fn receive_data(&self, raw: &[u8]) {
        let packet = match Packet::decode(raw) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping malformed packet from {}: {}", self.peer_addr, e);
                return;
            }
        };

        // decode everything before modifying state
        let (acks_in_body, payload) = if packet.message_id == MessageId::PACKET_ACK {
            match ack_block::deser_packet_ack(&mut packet.body.clone()) {
                Ok(acks) => (acks, None),
                Err(e) => {
                    debug!("dropping malformed ack packet #{} from {}: {}", packet.sequence(), self.peer_addr, e);
                    return;
                }
            }
        }
        else {
            match self.registry.decode(packet.message_id, &packet.body) {
                Ok(payload) => (Vec::new(), Some(payload)),
                Err(e) => {
                    debug!("dropping packet #{} from {}: message {} could not be decoded: {}", packet.sequence(), self.peer_addr, packet.message_id, e);
                    return;
                }
            }
        };

        let sequence = packet.sequence();
        let (newly_acked, is_new) = {
            let mut inner = self.inner.lock().await;
            if inner.state == CircuitState::Stopped {
                trace!("ignoring packet #{} from {} for stopped circuit", sequence, self.peer_addr);
                return;
            }
            inner.last_receive_time = Instant::now();

            let newly_acked = packet.acks.iter()
                .chain(acks_in_body.iter())
                .copied()
                .filter(|seq| inner.awaiting_peer_ack.remove(seq))
                .collect::<Vec<_>>();

            if packet.is_reliable() && !inner.pending_outbound_acks.contains(&sequence) {
                inner.pending_outbound_acks.push_back(sequence);
            }
            let is_new = inner.duplicates.check_and_insert(sequence);
            (newly_acked, is_new)
        };

        if !newly_acked.is_empty() {
            self.ack_notify.notify_waiters();
            for seq in newly_acked {
                self.event_handler.on_ack(self.peer_addr, seq).await;
            }
        }

        if !is_new {
            debug!("duplicate packet #{} from {} - not dispatching", sequence, self.peer_addr);
            return;
        }

        let Some(payload) = payload else {
            return;
        };

        if packet.message_id == MessageId::START_PING_CHECK {
            self.reply_to_ping(packet.body.clone()).await;
        }

        self.event_handler.on_message(self.peer_addr, ReceivedMessage {
            id: packet.message_id,
            sequence,
            flags: packet.flags(),
            payload,
        }).await;
    }

    async fn reply_to_ping(&self, mut body: Bytes) {
        let ping_id = match body.read_u8() {
            Ok(ping_id) => ping_id,
            Err(e) => {
                debug!("ping from {} without ping id: {}", self.peer_addr, e);
                return;
            }
        };
        trace!("replying to ping #{} from {}", ping_id, self.peer_addr);
        if let Err(e) = self.send(&Message::new(MessageId::COMPLETE_PING_CHECK, vec![ping_id])).await {
            debug!("failed to reply to ping from {}: {}", self.peer_addr, e);
        }
    }

    /// Sends owed acks in a dedicated ack packet if nothing was sent for the ack coalescing
    ///  threshold. Returns the number of acks sent.
    pub async fn flush_acks(&self) -> Result<usize, CircuitError> {
        let mut inner = self.inner.lock().await;
        if inner.state == CircuitState::Stopped
            || inner.pending_outbound_acks.is_empty()
            || inner.last_send_time.elapsed() < self.config.ack_coalesce_threshold
        {
            return Ok(0);
        }

        let max_acks = (self.config.mtu - PacketHeader::FIXED_LEN - MessageId::PACKET_ACK.serialized_len() - 1) / ack_block::ACK_LEN;
        let num_acks = min(min(max_acks, ack_block::MAX_ACKS_PER_PACKET), inner.pending_outbound_acks.len());
        let acks = inner.pending_outbound_acks.iter()
            .take(num_acks)
            .copied()
            .collect::<Vec<_>>();

        let mut body = BytesMut::with_capacity(ack_block::packet_ack_body_len(num_acks));
        ack_block::ser_packet_ack(&acks, &mut body)?;

        let sequence = inner.issue_sequence();
        let buf = Packet::encode_message(PacketFlags::empty(), sequence, &Message::new(MessageId::PACKET_ACK, body))?;
        self.transmit_locked(&mut inner, buf, false)?;

        inner.pending_outbound_acks.drain(..num_acks);
        trace!("sent ack packet #{} with {} acks to {}", sequence, num_acks, self.peer_addr);
        Ok(num_acks)
    }

    /// `false` if the circuit is (now) stopped
    async fn check_liveness(&self) -> bool {
        let silent_for = {
            let inner = self.inner.lock().await;
            if inner.state == CircuitState::Stopped {
                return false;
            }
            inner.last_receive_time.elapsed()
        };
        if silent_for < self.config.circuit_timeout {
            return true;
        }

        warn!("nothing received from {} for {:?} - circuit timed out", self.peer_addr, silent_for);
        self.event_handler.on_circuit_timeout(self.peer_addr).await;
        self.stop().await;
        false
    }

    async fn heartbeat_loop(circuit: Weak<Circuit>, cancel: CancellationToken) {
        let (ack_tick_interval, heartbeat_interval) = match circuit.upgrade() {
            Some(c) => (c.config.ack_tick_interval, c.config.heartbeat_interval),
            None => return,
        };

        let mut ack_ticks = time::interval(ack_tick_interval);
        ack_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut liveness_ticks = time::interval(heartbeat_interval);
        liveness_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = ack_ticks.tick() => {
                    let Some(circuit) = circuit.upgrade() else { break };
                    if let Err(e) = circuit.flush_acks().await {
                        debug!("failed to send acks to {}: {}", circuit.peer_addr, e);
                    }
                }
                _ = liveness_ticks.tick() => {
                    let Some(circuit) = circuit.upgrade() else { break };
                    if !circuit.check_liveness().await {
                        break;
                    }
                }
            }
        }
        trace!("heartbeat loop finished");
    }

    async fn inbound_loop(circuit: Weak<Circuit>, mut receiver: mpsc::UnboundedReceiver<InboundDatagram>, cancel: CancellationToken) {
        loop {
            select! {
                _ = cancel.cancelled() => break,
                datagram = receiver.recv() => {
                    let Some(datagram) = datagram else { break };
                    let Some(circuit) = circuit.upgrade() else { break };
                    circuit.receive_data(&datagram.data)
                        .instrument(datagram.span)
                        .await;
                }
            }
        }
        trace!("inbound loop finished");
    }
}
