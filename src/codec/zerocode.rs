//! Run-length coding for zero bytes ("zero-coding").
//!
//! ```ascii
//! literal bytes:   any non-zero byte stands for itself
//! zero run:        0x00 [0x00]* n      (n != 0)
//! ```
//!
//! A 0x00 byte introduces a run. Further 0x00 bytes after it are skipped, and the first
//!  non-zero byte is the run length, so `[0x00, 0x00, 0x03]` is a run of 3, the same as
//!  `[0x00, 0x03]`. The compressor only produces the short form, splitting runs longer than 255.
//!
//! Expanded length is fully determined by the input, and [expand] computes it with a dry run
//!  before allocating.

use bytes::{Buf, BufMut, BytesMut};

use crate::codec::BufExt;
use crate::error::{CodecError, CodecResult};

enum Token {
    Literal(u8),
    ZeroRun(usize),
}

fn walk(buf: &mut impl Buf, mut f: impl FnMut(Token)) -> CodecResult<()> {
    while buf.has_remaining() {
        match buf.get_u8() {
            0 => {
                let count = loop {
                    match buf.read_u8()? {
                        0 => continue,
                        n => break n,
                    }
                };
                f(Token::ZeroRun(count.into()));
            }
            b => f(Token::Literal(b)),
        }
    }
    Ok(())
}

fn range(src: &[u8], start: usize, length: usize) -> CodecResult<&[u8]> {
    start.checked_add(length)
        .and_then(|end| src.get(start..end))
        .ok_or(CodecError::BufferUnderrun {
            required: length,
            available: src.len().saturating_sub(start),
        })
}

/// Dry run: the number of bytes [expand] produces for the same range
pub fn expanded_len(src: &[u8], start: usize, length: usize) -> CodecResult<usize> {
    let mut result: usize = 0;
    walk(&mut range(src, start, length)?, |token| {
        result += match token {
            Token::Literal(_) => 1,
            Token::ZeroRun(n) => n,
        };
    })?;
    Ok(result)
}

pub fn expand(src: &[u8], start: usize, length: usize) -> CodecResult<BytesMut> {
    let len = expanded_len(src, start, length)?;
    let mut dest = BytesMut::with_capacity(len);

    walk(&mut range(src, start, length)?, |token| {
        match token {
            Token::Literal(b) => dest.put_u8(b),
            Token::ZeroRun(n) => dest.put_bytes(0, n),
        }
    })?;
    debug_assert_eq!(dest.len(), len);
    Ok(dest)
}

pub fn compress(src: &[u8]) -> BytesMut {
    let mut dest = BytesMut::with_capacity(src.len());

    let mut run: u8 = 0;
    for &b in src {
        if b == 0 {
            if run == u8::MAX {
                dest.put_slice(&[0, run]);
                run = 0;
            }
            run += 1;
        }
        else {
            if run > 0 {
                dest.put_slice(&[0, run]);
                run = 0;
            }
            dest.put_u8(b);
        }
    }
    if run > 0 {
        dest.put_slice(&[0, run]);
    }
    dest
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(vec![], vec![])]
    #[case::literal(vec![1, 2, 3], vec![1, 2, 3])]
    #[case::run_after_literal(vec![0x05, 0x00, 0x00, 0x03], vec![0x05, 0x00, 0x00, 0x00])]
    #[case::short_run(vec![0x00, 0x02, 0x07], vec![0, 0, 7])]
    #[case::run_of_255(vec![0x00, 0xff], vec![0; 255])]
    #[case::leading_zero_digits(vec![0x00, 0x00, 0x00, 0x01], vec![0])]
    #[case::skipped_zeros_not_counted(vec![0x00, 0x00, 0x00, 0x02, 0x04], vec![0, 0, 4])]
    #[case::two_runs(vec![0x00, 0x01, 0x09, 0x00, 0x03], vec![0, 9, 0, 0, 0])]
    fn test_expand(#[case] src: Vec<u8>, #[case] expected: Vec<u8>) {
        assert_eq!(expanded_len(&src, 0, src.len()).unwrap(), expected.len());
        assert_eq!(expand(&src, 0, src.len()).unwrap().as_ref(), expected.as_slice());
    }

    #[test]
    fn test_expand_sub_range() {
        let src = [0xaa, 0xbb, 0x00, 0x02, 0xcc];
        assert_eq!(expand(&src, 1, 3).unwrap().as_ref(), &[0xbb, 0, 0]);
    }

    #[rstest]
    #[case::dangling_zero(vec![0x05, 0x00])]
    #[case::unterminated_count(vec![0x00, 0x00, 0x00])]
    fn test_expand_truncated(#[case] src: Vec<u8>) {
        assert!(matches!(expanded_len(&src, 0, src.len()), Err(CodecError::BufferUnderrun { .. })));
        assert!(matches!(expand(&src, 0, src.len()), Err(CodecError::BufferUnderrun { .. })));
    }

    #[test]
    fn test_expand_range_outside_buffer() {
        let src = [1, 2, 3];
        assert!(matches!(expand(&src, 2, 5), Err(CodecError::BufferUnderrun { .. })));
    }

    #[rstest]
    #[case::no_zeros(vec![1, 2, 3], vec![1, 2, 3])]
    #[case::single_zero(vec![1, 0, 2], vec![1, 0, 1, 2])]
    #[case::trailing_run(vec![7, 0, 0, 0], vec![7, 0, 3])]
    #[case::run_of_256(vec![0; 256], vec![0, 255, 0, 1])]
    #[case::run_of_510(vec![0; 510], vec![0, 255, 0, 255])]
    fn test_compress(#[case] src: Vec<u8>, #[case] expected: Vec<u8>) {
        assert_eq!(compress(&src).as_ref(), expected.as_slice());
    }

    #[test]
    fn test_round_trip() {
        let mut inputs: Vec<Vec<u8>> = vec![
            vec![],
            vec![0],
            vec![0; 1000],
            (0..=255u8).collect(),
            (0..2000u32).map(|i| if i % 7 == 0 { (i % 251) as u8 } else { 0 }).collect(),
        ];
        // pseudo random sparse data, deterministic
        let mut state: u32 = 0x1234_5678;
        for _ in 0..50 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let len = (state % 300) as usize;
            let data = (0..len)
                .map(|_| {
                    state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                    if state % 3 == 0 { (state >> 24) as u8 } else { 0 }
                })
                .collect();
            inputs.push(data);
        }

        for data in inputs {
            let compressed = compress(&data);
            assert_eq!(expanded_len(&compressed, 0, compressed.len()).unwrap(), data.len());
            assert_eq!(expand(&compressed, 0, compressed.len()).unwrap().as_ref(), data.as_slice());
        }
    }
}
