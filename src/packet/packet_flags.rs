use bitflags::bitflags;

bitflags! {
    /// First byte of every packet. Bit positions are fixed by the peer protocol.
    #[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, Default)]
    pub struct PacketFlags: u8 {
        /// message id and body are zero-coded
        const ZEROCODED = 0b1000_0000;
        /// the receiver must acknowledge the sequence number
        const RELIABLE  = 0b0100_0000;
        /// retransmission of a sequence number that was sent before
        const RESENT    = 0b0010_0000;
        /// an ack block is appended to the packet
        const ACK       = 0b0001_0000;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zerocoded(PacketFlags::ZEROCODED, 0x80)]
    #[case::reliable(PacketFlags::RELIABLE, 0x40)]
    #[case::resent(PacketFlags::RESENT, 0x20)]
    #[case::ack(PacketFlags::ACK, 0x10)]
    #[case::combined(PacketFlags::RELIABLE | PacketFlags::ACK, 0x50)]
    fn test_bits(#[case] flags: PacketFlags, #[case] bits: u8) {
        assert_eq!(flags.bits(), bits);
        assert_eq!(PacketFlags::from_bits_truncate(bits), flags);
    }

    #[test]
    fn test_unknown_bits_are_ignored() {
        assert_eq!(PacketFlags::from_bits_truncate(0x4f), PacketFlags::RELIABLE);
    }
}
