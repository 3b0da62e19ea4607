//! Primitive wire encodings shared by all messages.
//!
//! Reading goes through [BufExt] on top of any `bytes::Buf`. Its reads are bounds-checked and
//!  fail with [CodecError::BufferUnderrun](crate::error::CodecError::BufferUnderrun) instead of
//!  panicking. Writing goes through [BufMutExt] on top of any `bytes::BufMut`, so plain integers
//!  use the `put_u32_le` / `put_u32` family directly.
//!
//! Byte order conventions:
//! * integers: whatever the field declares (both orders are used by the protocol)
//! * `f32` / `f64`: IEEE754 little-endian
//! * 128-bit identifiers: fixed permutation, see [identifier]
//! * vectors and quaternions: Y and Z swapped, see [vector]

pub mod buf_ext;
pub mod identifier;
pub mod varint;
pub mod vector;
pub mod zerocode;

pub use buf_ext::{BufExt, BufMutExt, StringLength};
pub use vector::{Quaternion, Vector3, Vector3d};
