use bytes::{Buf, Bytes, BufMut};

use crate::codec::BufExt;
use crate::error::{CodecError, CodecResult};
use crate::packet::packet_flags::PacketFlags;
use crate::util::safe_converter::PrecheckedCast;

/// ```ascii
/// 0: flags (u8)
/// 1: sequence number (u32 BE)
/// 5: extra header length (u8)
/// 6: extra header bytes, opaque
/// ```
///
/// The header is never zero-coded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub sequence: u32,
    pub extra: Bytes,
}

impl PacketHeader {
    pub const FIXED_LEN: usize = 6;
    pub const OFFSET_SEQUENCE: usize = 1;

    pub fn new(flags: PacketFlags, sequence: u32) -> PacketHeader {
        PacketHeader {
            flags,
            sequence,
            extra: Bytes::new(),
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::FIXED_LEN + self.extra.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) -> CodecResult<()> {
        if self.extra.len() > u8::MAX as usize {
            return Err(CodecError::ProtocolViolation(format!("extra header of {} bytes exceeds 255", self.extra.len())));
        }
        buf.put_u8(self.flags.bits());
        buf.put_u32(self.sequence);
        buf.put_u8(self.extra.len().prechecked_cast());
        buf.put_slice(&self.extra);
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<PacketHeader> {
        let flags = PacketFlags::from_bits_truncate(buf.read_u8()?);
        let sequence = buf.read_u32_be()?;
        let extra_len = buf.read_u8()?;
        let extra = buf.read_bytes(extra_len.into())?;
        Ok(PacketHeader {
            flags,
            sequence,
            extra,
        })
    }

    /// Overwrites the sequence number of an already serialized packet
    pub fn patch_sequence(buf: &mut [u8], sequence: u32) {
        buf[Self::OFFSET_SEQUENCE..Self::OFFSET_SEQUENCE + 4].copy_from_slice(&sequence.to_be_bytes());
    }

    /// Sets additional flags on an already serialized packet, keeping the ones that are set
    pub fn insert_flags(buf: &mut [u8], flags: PacketFlags) {
        buf[0] |= flags.bits();
    }
}
