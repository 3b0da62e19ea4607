//! Utilities for testing code built on circuits. They are used by this crate's own tests, and
//!  they are exported so applications can fake a peer in their tests.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::{Bytes, BytesMut};

use crate::packet::ack_block;
use crate::packet::{Message, MessageId, Packet, PacketFlags};

/// convenience method for unit test code: create a [SocketAddr] based on a number, the same
///  number generating the same address and different numbers different addresses
pub fn test_addr(number: u16) -> SocketAddr {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, number).into()
}

/// A packet as a peer would send it, with optional appended acks
pub fn peer_packet(flags: PacketFlags, sequence: u32, message: &Message, acks: &[u32]) -> Bytes {
    let mut buf: BytesMut = Packet::encode_message(flags, sequence, message)
        .expect("test message should be encodable");
    ack_block::append_acks(&mut buf, acks)
        .expect("test acks should fit");
    buf.freeze()
}

/// A dedicated ack packet as a peer would send it
pub fn peer_ack_packet(sequence: u32, acks: &[u32]) -> Bytes {
    let mut body = BytesMut::new();
    ack_block::ser_packet_ack(acks, &mut body)
        .expect("test acks should fit");
    peer_packet(PacketFlags::empty(), sequence, &Message::new(MessageId::PACKET_ACK, body), &[])
}
