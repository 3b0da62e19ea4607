//! Acks travel in two forms:
//!
//! * appended to an unrelated packet as a trailing block, which is never zero-coded:
//!   `[seq: u32 BE]* [count: u8]`, announced by [PacketFlags::ACK]
//! * as the body of a dedicated [MessageId::PACKET_ACK](crate::packet::MessageId::PACKET_ACK)
//!   message: `[count: u8] [seq: u32 LE]*`

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::BufExt;
use crate::error::{CodecError, CodecResult};
use crate::packet::packet_flags::PacketFlags;
use crate::packet::packet_header::PacketHeader;
use crate::util::safe_converter::PrecheckedCast;

pub const MAX_ACKS_PER_PACKET: usize = u8::MAX as usize;

pub const ACK_LEN: usize = std::mem::size_of::<u32>();

/// Bytes needed for a trailing block of `num_acks` acks
pub fn ack_block_len(num_acks: usize) -> usize {
    if num_acks == 0 {
        0
    }
    else {
        num_acks * ACK_LEN + 1
    }
}

/// The number of acks that fit into a trailing block when `budget` bytes are left in a packet
pub fn acks_fitting(budget: usize) -> usize {
    (budget.saturating_sub(1) / ACK_LEN).min(MAX_ACKS_PER_PACKET)
}

/// Appends a trailing ack block to a fully encoded packet and sets the ACK flag. Does nothing
///  for an empty list.
pub fn append_acks(packet: &mut BytesMut, acks: &[u32]) -> CodecResult<()> {
    if acks.is_empty() {
        return Ok(());
    }
    if acks.len() > MAX_ACKS_PER_PACKET {
        return Err(CodecError::ProtocolViolation(format!("{} acks exceed the maximum of {} per packet", acks.len(), MAX_ACKS_PER_PACKET)));
    }
    if packet.len() < PacketHeader::FIXED_LEN {
        return Err(CodecError::ProtocolViolation("acks can only be appended to an encoded packet".to_string()));
    }

    for &seq in acks {
        packet.put_u32(seq);
    }
    packet.put_u8(acks.len().prechecked_cast());
    PacketHeader::insert_flags(packet, PacketFlags::ACK);
    Ok(())
}

/// Strips the trailing ack block (if the ACK flag is set) from a raw packet, returning the
///  remaining packet and the acks in the order they were appended. The block must not reach
///  into the fixed header.
pub fn split_acks(raw: &[u8]) -> CodecResult<(&[u8], Vec<u32>)> {
    let mut header = raw;
    let flags = PacketFlags::from_bits_truncate(header.read_u8()?);
    if !flags.contains(PacketFlags::ACK) {
        return Ok((raw, Vec::new()));
    }

    let count: usize = raw.len().checked_sub(1)
        .and_then(|idx| raw.get(idx))
        .copied()
        .ok_or_else(|| CodecError::ProtocolViolation("missing ack count".to_string()))?
        .into();
    let block_len = ack_block_len(count).max(1);

    let packet_len = raw.len()
        .checked_sub(block_len)
        .filter(|&len| len >= PacketHeader::FIXED_LEN)
        .ok_or_else(|| CodecError::ProtocolViolation(format!("ack block with {} acks does not fit a packet of {} bytes", count, raw.len())))?;

    let mut block = &raw[packet_len..raw.len() - 1];
    let mut acks = Vec::with_capacity(count);
    for _ in 0..count {
        acks.push(block.read_u32_be()?);
    }
    Ok((&raw[..packet_len], acks))
}

/// Body of a dedicated ack message
pub fn ser_packet_ack(acks: &[u32], buf: &mut impl BufMut) -> CodecResult<()> {
    if acks.len() > MAX_ACKS_PER_PACKET {
        return Err(CodecError::ProtocolViolation(format!("{} acks exceed the maximum of {} per packet", acks.len(), MAX_ACKS_PER_PACKET)));
    }
    buf.put_u8(acks.len().prechecked_cast());
    for &seq in acks {
        buf.put_u32_le(seq);
    }
    Ok(())
}

pub fn deser_packet_ack(buf: &mut impl Buf) -> CodecResult<Vec<u32>> {
    let count = buf.read_u8()?;
    let mut acks = Vec::with_capacity(count.into());
    for _ in 0..count {
        acks.push(buf.read_u32_le()?);
    }
    Ok(acks)
}

/// Body size of a dedicated ack message with `num_acks` acks
pub fn packet_ack_body_len(num_acks: usize) -> usize {
    1 + num_acks * ACK_LEN
}
