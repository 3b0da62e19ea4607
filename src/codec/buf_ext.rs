use bytes::{Buf, BufMut, Bytes};
use uuid::Uuid;

use crate::codec::identifier;
use crate::codec::varint;
use crate::codec::vector::{Quaternion, Vector3, Vector3d};
use crate::error::{CodecError, CodecResult};

/// Length convention of a string field. The convention is part of the message schema, so the
///  caller selects it per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringLength {
    /// one length byte, followed by that many bytes
    U8Prefixed,
    /// two length bytes (little-endian), followed by that many bytes
    U16Prefixed,
    /// bytes up to and including a 0 byte
    NulTerminated,
    /// everything that is left in the buffer
    Remaining,
}

macro_rules! get_try_impl {
    ($try_getter: ident, $ty:ty, $getter: ident) => {
        fn $try_getter(&mut self) -> CodecResult<$ty> {
            self.ensure_remaining(std::mem::size_of::<$ty>())?;
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked reads on top of `bytes::Buf`. Every read checks `remaining()` before touching
///  the buffer, so a failed read consumes nothing and reports [CodecError::BufferUnderrun]
///  instead of panicking.
pub trait BufExt: Buf {
    fn ensure_remaining(&self, required: usize) -> CodecResult<()> {
        if self.remaining() < required {
            return Err(CodecError::BufferUnderrun {
                required,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    get_try_impl!(read_u8, u8, get_u8);
    get_try_impl!(read_i8, i8, get_i8);

    get_try_impl!(read_u16_le, u16, get_u16_le);
    get_try_impl!(read_u16_be, u16, get_u16);
    get_try_impl!(read_i16_le, i16, get_i16_le);
    get_try_impl!(read_i16_be, i16, get_i16);
    get_try_impl!(read_u32_le, u32, get_u32_le);
    get_try_impl!(read_u32_be, u32, get_u32);
    get_try_impl!(read_i32_le, i32, get_i32_le);
    get_try_impl!(read_i32_be, i32, get_i32);
    get_try_impl!(read_u64_le, u64, get_u64_le);
    get_try_impl!(read_u64_be, u64, get_u64);
    get_try_impl!(read_i64_le, i64, get_i64_le);
    get_try_impl!(read_i64_be, i64, get_i64);

    // floating point values are always little-endian on the wire, regardless of the host
    get_try_impl!(read_f32, f32, get_f32_le);
    get_try_impl!(read_f64, f64, get_f64_le);

    fn read_bool(&mut self) -> CodecResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_bytes(&mut self, len: usize) -> CodecResult<Bytes> {
        self.ensure_remaining(len)?;
        Ok(self.copy_to_bytes(len))
    }

    /// Reads a string field, dropping all NUL bytes (terminators and embedded ones alike).
    ///  Invalid UTF-8 is replaced rather than rejected since peers are not strict about it.
    fn read_string(&mut self, convention: StringLength) -> CodecResult<String> {
        let raw = match convention {
            StringLength::U8Prefixed => {
                let len = self.read_u8()?;
                self.read_bytes(len.into())?.to_vec()
            }
            StringLength::U16Prefixed => {
                let len = self.read_u16_le()?;
                self.read_bytes(len.into())?.to_vec()
            }
            StringLength::NulTerminated => {
                let mut raw = Vec::new();
                loop {
                    if !self.has_remaining() {
                        return Err(CodecError::ProtocolViolation(format!("string of {} bytes is not NUL terminated", raw.len())));
                    }
                    match self.get_u8() {
                        0 => break,
                        b => raw.push(b),
                    }
                }
                raw
            }
            StringLength::Remaining => self.copy_to_bytes(self.remaining()).to_vec(),
        };

        let stripped = raw.into_iter()
            .filter(|&b| b != 0)
            .collect::<Vec<_>>();
        Ok(String::from_utf8_lossy(&stripped).into_owned())
    }

    fn read_uuid(&mut self) -> CodecResult<Uuid> {
        self.ensure_remaining(identifier::IDENTIFIER_LEN)?;
        let mut bytes = [0u8; identifier::IDENTIFIER_LEN];
        self.copy_to_slice(&mut bytes);
        Ok(identifier::from_wire(bytes))
    }

    fn read_vector3(&mut self) -> CodecResult<Vector3> {
        let x = self.read_f32()?;
        let z = self.read_f32()?;
        let y = self.read_f32()?;
        Ok(Vector3 { x, y, z })
    }

    fn read_vector3d(&mut self) -> CodecResult<Vector3d> {
        let x = self.read_f64()?;
        let z = self.read_f64()?;
        let y = self.read_f64()?;
        Ok(Vector3d { x, y, z })
    }

    /// Three components on the wire, W is reconstructed
    fn read_quaternion(&mut self) -> CodecResult<Quaternion> {
        let x = self.read_f32()?;
        let z = self.read_f32()?;
        let y = self.read_f32()?;
        Ok(Quaternion::from_xyz(x, y, z))
    }

    fn read_quaternion_with_w(&mut self) -> CodecResult<Quaternion> {
        let x = self.read_f32()?;
        let z = self.read_f32()?;
        let y = self.read_f32()?;
        let w = self.read_f32()?;
        Ok(Quaternion { x, y, z, w })
    }

    fn read_varint(&mut self) -> CodecResult<u64> {
        let mut result: u64 = 0;
        loop {
            let b = self.read_u8()?;
            if result.leading_zeros() < 7 {
                return Err(CodecError::ProtocolViolation("varint exceeds 64 bits".to_string()));
            }
            result = (result << 7) | u64::from(b & 0x7f);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
    }
}

/// Writing counterparts for the protocol specific encodings. Plain integers are written with
///  `BufMut`'s own `put_u32_le` / `put_u32` etc.
pub trait BufMutExt: BufMut {
    fn put_f32_wire(&mut self, v: f32) {
        self.put_f32_le(v);
    }
    fn put_f64_wire(&mut self, v: f64) {
        self.put_f64_le(v);
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u8(v.into());
    }

    /// Length prefixes count the trailing NUL that is written after non-empty strings. An
    ///  empty string is written as length 0 without a terminator.
    fn put_string(&mut self, s: &str, convention: StringLength) -> CodecResult<()> {
        let bytes = s.as_bytes();
        let len_with_nul = if bytes.is_empty() { 0 } else { bytes.len() + 1 };

        match convention {
            StringLength::U8Prefixed => {
                let len: u8 = len_with_nul.try_into()
                    .map_err(|_| CodecError::ProtocolViolation(format!("string of {} bytes does not fit a 1 byte length", bytes.len())))?;
                self.put_u8(len);
            }
            StringLength::U16Prefixed => {
                let len: u16 = len_with_nul.try_into()
                    .map_err(|_| CodecError::ProtocolViolation(format!("string of {} bytes does not fit a 2 byte length", bytes.len())))?;
                self.put_u16_le(len);
            }
            StringLength::NulTerminated => {
                self.put_slice(bytes);
                self.put_u8(0);
                return Ok(());
            }
            StringLength::Remaining => {
                self.put_slice(bytes);
                return Ok(());
            }
        }

        if !bytes.is_empty() {
            self.put_slice(bytes);
            self.put_u8(0);
        }
        Ok(())
    }

    fn put_uuid(&mut self, id: &Uuid) {
        self.put_slice(&identifier::to_wire(id));
    }

    fn put_vector3(&mut self, v: &Vector3) {
        self.put_f32_wire(v.x);
        self.put_f32_wire(v.z);
        self.put_f32_wire(v.y);
    }

    fn put_vector3d(&mut self, v: &Vector3d) {
        self.put_f64_wire(v.x);
        self.put_f64_wire(v.z);
        self.put_f64_wire(v.y);
    }

    /// Normalized, with W implied by the three vector components
    fn put_quaternion(&mut self, q: &Quaternion) {
        let q = q.normalized();
        self.put_f32_wire(q.x);
        self.put_f32_wire(q.z);
        self.put_f32_wire(q.y);
    }

    fn put_quaternion_with_w(&mut self, q: &Quaternion) {
        let q = q.normalized();
        self.put_f32_wire(q.x);
        self.put_f32_wire(q.z);
        self.put_f32_wire(q.y);
        self.put_f32_wire(q.w);
    }

    fn put_varint(&mut self, v: u64) {
        let mut buf = [0u8; varint::MAX_VARINT_LEN];
        let len = varint::encode(v, &mut buf);
        self.put_slice(&buf[..len]);
    }
}

impl <T: Buf> BufExt for T {}

impl <T: BufMut> BufMutExt for T {}
