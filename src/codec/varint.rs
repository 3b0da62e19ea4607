//! Unsigned base-128 varint, most significant group first. Every byte but the last has the top
//!  bit set:
//!
//! ```ascii
//! 300 = 0b10_0101100  ->  [1000_0010] [0010_1100]
//! ```

pub const MAX_VARINT_LEN: usize = 10;

/// Writes `v` to the start of `buf`, returning the number of bytes used
pub fn encode(v: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let num_groups = (64 - v.leading_zeros() as usize).div_ceil(7).max(1);

    for i in 0..num_groups {
        let shift = 7 * (num_groups - 1 - i);
        let group = ((v >> shift) & 0x7f) as u8;
        buf[i] = if i + 1 < num_groups { group | 0x80 } else { group };
    }
    num_groups
}
