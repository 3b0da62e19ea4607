//! Packet framing on top of the primitive codec.
//!
//! ```ascii
//! 0: flags (u8)
//! 1: sequence number (u32 BE)
//! 5: extra header length (u8)
//! 6: extra header bytes
//! *: message id (1, 2 or 4 bytes)  \  zero-coded as a unit if
//! *: message body                  /  the ZEROCODED flag is set
//! *: ack block (optional)             never zero-coded
//! ```
//!
//! Decoding strips the ack block first, then expands the zero-coded part, then reads the
//!  message id. Interpreting the body is left to the [MessageRegistry](crate::message_registry::MessageRegistry).

pub mod ack_block;
pub mod message_id;
pub mod packet_flags;
pub mod packet_header;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::zerocode;
use crate::error::CodecResult;
pub use message_id::MessageId;
pub use packet_flags::PacketFlags;
pub use packet_header::PacketHeader;

/// An application message as handed to a circuit for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: Bytes,
    /// Try zero-coding when encoding. It is only applied if it actually makes the packet smaller.
    pub zerocode: bool,
}
impl Message {
    pub fn new(id: MessageId, body: impl Into<Bytes>) -> Message {
        Message {
            id,
            body: body.into(),
            zerocode: false,
        }
    }

    pub fn zerocoded(id: MessageId, body: impl Into<Bytes>) -> Message {
        Message {
            id,
            body: body.into(),
            zerocode: true,
        }
    }

    /// Bytes of message id and body before zero-coding
    pub fn payload_len(&self) -> usize {
        self.id.serialized_len() + self.body.len()
    }
}

/// A decoded inbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub message_id: MessageId,
    /// after zero-expansion, without message id and ack block
    pub body: Bytes,
    pub acks: Vec<u32>,
}

impl Packet {
    /// Encodes header, message id and body. Acks are appended separately with
    ///  [ack_block::append_acks] once the packet's final size is known.
    pub fn encode_message(flags: PacketFlags, sequence: u32, message: &Message) -> CodecResult<BytesMut> {
        let flags = flags - PacketFlags::ZEROCODED - PacketFlags::ACK;

        let mut payload = BytesMut::with_capacity(message.payload_len());
        message.id.ser(&mut payload)?;
        payload.extend_from_slice(&message.body);

        let (flags, payload) = if message.zerocode {
            let compressed = zerocode::compress(&payload);
            if compressed.len() < payload.len() {
                (flags | PacketFlags::ZEROCODED, compressed)
            }
            else {
                (flags, payload)
            }
        }
        else {
            (flags, payload)
        };

        let header = PacketHeader::new(flags, sequence);
        let mut buf = BytesMut::with_capacity(header.serialized_len() + payload.len());
        header.ser(&mut buf)?;
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    pub fn decode(raw: &[u8]) -> CodecResult<Packet> {
        let (mut packet, acks) = ack_block::split_acks(raw)?;
        let header = PacketHeader::deser(&mut packet)?;

        // what is left after the header is message id and body
        let mut body: Bytes = if header.flags.contains(PacketFlags::ZEROCODED) {
            zerocode::expand(packet, 0, packet.len())?.freeze()
        }
        else {
            Bytes::copy_from_slice(packet)
        };
        let message_id = MessageId::deser(&mut body)?;

        trace!("decoded packet #{} {:?} with message {}: {} body bytes, {} acks", header.sequence, header.flags, message_id, body.len(), acks.len());
        Ok(Packet {
            header,
            message_id,
            body,
            acks,
        })
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    pub fn flags(&self) -> PacketFlags {
        self.header.flags
    }

    pub fn is_reliable(&self) -> bool {
        self.header.flags.contains(PacketFlags::RELIABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::error::CodecError;

    #[test]
    fn test_encode_layout() {
        let msg = Message::new(MessageId::Medium(3), vec![1u8, 2, 3]);
        let buf = Packet::encode_message(PacketFlags::RELIABLE, 0x0102, &msg).unwrap();
        assert_eq!(buf.as_ref(), &[0x40, 0, 0, 1, 2, 0, 0xFF, 3, 1, 2, 3]);
    }

    #[test]
    fn test_encode_zerocoded() {
        let msg = Message::zerocoded(MessageId::High(5), vec![0u8; 20]);
        let buf = Packet::encode_message(PacketFlags::empty(), 1, &msg).unwrap();
        assert_eq!(buf.as_ref(), &[0x80, 0, 0, 0, 1, 0, 5, 0, 20]);

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(packet.message_id, MessageId::High(5));
        assert_eq!(packet.body.as_ref(), &[0u8; 20]);
    }

    #[test]
    fn test_encode_zerocoding_skipped_if_not_smaller() {
        let msg = Message::zerocoded(MessageId::High(5), vec![1u8, 0, 2]);
        let buf = Packet::encode_message(PacketFlags::empty(), 1, &msg).unwrap();
        assert_eq!(buf[0], 0);
        assert_eq!(&buf[6..], &[5, 1, 0, 2]);
    }

    #[test]
    fn test_encode_ignores_framing_flags() {
        let msg = Message::new(MessageId::High(5), Bytes::new());
        let buf = Packet::encode_message(PacketFlags::all(), 1, &msg).unwrap();
        assert_eq!(PacketFlags::from_bits_truncate(buf[0]), PacketFlags::RELIABLE | PacketFlags::RESENT);
    }

    #[rstest]
    #[case::plain(Message::new(MessageId::Low(400), vec![9u8, 0, 0, 0, 8]), vec![])]
    #[case::zerocoded(Message::zerocoded(MessageId::Fixed(0xFC), vec![0u8, 0, 0, 0, 0, 0, 7]), vec![])]
    #[case::with_acks(Message::new(MessageId::High(1), vec![0u8, 0, 0, 0]), vec![3, 1, 2])]
    #[case::zerocoded_with_acks(Message::zerocoded(MessageId::High(9), vec![0u8; 40]), vec![0, 0x100, 0xFFFF_FFFF])]
    fn test_decode(#[case] msg: Message, #[case] acks: Vec<u32>) {
        let mut buf = Packet::encode_message(PacketFlags::RELIABLE, 77, &msg).unwrap();
        ack_block::append_acks(&mut buf, &acks).unwrap();

        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(packet.sequence(), 77);
        assert!(packet.is_reliable());
        assert_eq!(packet.flags().contains(PacketFlags::ACK), !acks.is_empty());
        assert_eq!(packet.message_id, msg.id);
        assert_eq!(packet.body, msg.body);
        assert_eq!(packet.acks, acks);
    }

    #[test]
    fn test_decode_extra_header() {
        let buf = [0x00, 0, 0, 0, 3, 2, 0xAA, 0xBB, 4, 0x11];
        let packet = Packet::decode(&buf).unwrap();
        assert_eq!(packet.header.extra.as_ref(), &[0xAA, 0xBB]);
        assert_eq!(packet.message_id, MessageId::High(4));
        assert_eq!(packet.body.as_ref(), &[0x11]);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::header_only(vec![0x40, 0, 0, 0, 1, 0])]
    #[case::truncated_header(vec![0x40, 0, 0])]
    #[case::broken_zerocoding(vec![0x80, 0, 0, 0, 1, 0, 5, 0])]
    #[case::broken_ack_block(vec![0x10, 0, 0, 0, 1, 0, 5, 9])]
    fn test_decode_malformed(#[case] buf: Vec<u8>) {
        let result = Packet::decode(&buf);
        assert!(matches!(result, Err(CodecError::BufferUnderrun { .. }) | Err(CodecError::ProtocolViolation(_))), "{:?}", result);
    }
}
