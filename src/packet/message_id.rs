use std::fmt::{Debug, Display, Formatter};
use bytes::{Buf, BufMut};

use crate::codec::BufExt;
use crate::error::{CodecError, CodecResult};

/// Message ids are tiered by frequency: the most frequent messages get one-byte ids, rarer
///  ones use an escape prefix of 0xFF bytes.
///
/// ```ascii
/// High    [n]                      n in 1..=0xFE
/// Medium  [0xFF] [n]               n in 1..=0xFE
/// Low     [0xFF] [0xFF] [u16 BE]   high byte != 0xFF
/// Fixed   [0xFF] [0xFF] [0xFF] [n]
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageId {
    High(u8),
    Medium(u8),
    Low(u16),
    Fixed(u8),
}

impl MessageId {
    pub const START_PING_CHECK: MessageId = MessageId::High(1);
    pub const COMPLETE_PING_CHECK: MessageId = MessageId::High(2);

    pub const PACKET_ACK: MessageId = MessageId::Fixed(0xFB);
    pub const OPEN_CIRCUIT: MessageId = MessageId::Fixed(0xFC);
    pub const CLOSE_CIRCUIT: MessageId = MessageId::Fixed(0xFD);

    pub fn serialized_len(&self) -> usize {
        match self {
            MessageId::High(_) => 1,
            MessageId::Medium(_) => 2,
            MessageId::Low(_) => 4,
            MessageId::Fixed(_) => 4,
        }
    }

    /// Ids that cannot be represented in their tier (e.g. `High(0xFF)`) are rejected since the
    ///  peer would read them as a different id
    pub fn ser(&self, buf: &mut impl BufMut) -> CodecResult<()> {
        match *self {
            MessageId::High(n) => {
                if n == 0xFF {
                    return Err(CodecError::ProtocolViolation(format!("{} is not a valid id", self)));
                }
                buf.put_u8(n);
            }
            MessageId::Medium(n) => {
                if n == 0xFF {
                    return Err(CodecError::ProtocolViolation(format!("{} is not a valid id", self)));
                }
                buf.put_slice(&[0xFF, n]);
            }
            MessageId::Low(n) => {
                if n >> 8 == 0xFF {
                    return Err(CodecError::ProtocolViolation(format!("{} is not a valid id", self)));
                }
                buf.put_slice(&[0xFF, 0xFF]);
                buf.put_u16(n);
            }
            MessageId::Fixed(n) => {
                buf.put_slice(&[0xFF, 0xFF, 0xFF, n]);
            }
        }
        Ok(())
    }

    pub fn deser(buf: &mut impl Buf) -> CodecResult<MessageId> {
        let b = buf.read_u8()?;
        if b != 0xFF {
            return Ok(MessageId::High(b));
        }
        let b = buf.read_u8()?;
        if b != 0xFF {
            return Ok(MessageId::Medium(b));
        }
        let b = buf.read_u8()?;
        if b != 0xFF {
            let lo = buf.read_u8()?;
            return Ok(MessageId::Low(u16::from_be_bytes([b, lo])));
        }
        Ok(MessageId::Fixed(buf.read_u8()?))
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::High(n) => write!(f, "High({})", n),
            MessageId::Medium(n) => write!(f, "Medium({})", n),
            MessageId::Low(n) => write!(f, "Low({})", n),
            MessageId::Fixed(n) => write!(f, "Fixed(0x{:02X})", n),
        }
    }
}
impl Debug for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
