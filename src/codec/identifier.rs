//! 128-bit identifiers go on the wire with their first three groups byte-swapped: source bytes
//!  are sent in the order 3,2,1,0,5,4,7,6,8,9,10,11,12,13,14,15. This is the mixed-endian
//!  layout `uuid` calls "little-endian fields", so the conversion delegates to it.

use uuid::Uuid;

pub const IDENTIFIER_LEN: usize = 16;

pub fn to_wire(id: &Uuid) -> [u8; IDENTIFIER_LEN] {
    id.to_bytes_le()
}

pub fn from_wire(bytes: [u8; IDENTIFIER_LEN]) -> Uuid {
    Uuid::from_bytes_le(bytes)
}
