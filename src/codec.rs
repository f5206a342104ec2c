//! Binary codec for fixed-width integers and transfer-encoded text.
//!
//! Integer encoding always produces exactly the target type's width; decoding
//! consumes the largest power-of-two width that fits both the target type and
//! the source buffer. Decoding into a narrower target than the encoded width
//! therefore consults only the leading `size_of::<T>()` bytes. This prefix-read
//! policy is deliberate and matched by the test suite.

use crate::error::{Error, Result};

/// Byte order for integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most-significant byte first.
    Big,
    /// Least-significant byte first.
    Little,
}

/// Fixed-width integer that can cross the wire in either byte order.
pub trait WireInt: Copy {
    /// Width of the type in bytes (1, 2, 4 or 8).
    const WIDTH: usize;

    /// Widen to a raw 64-bit pattern (sign bits beyond `WIDTH` are irrelevant).
    fn to_raw(self) -> u64;

    /// Rebuild from the low `8 * width` bits of a raw pattern, extending to the
    /// full type: sign-extension for signed types, zero-extension otherwise.
    fn from_raw(raw: u64, width: usize) -> Self;
}

macro_rules! impl_wire_uint {
    ($($t:ty),*) => {$(
        impl WireInt for $t {
            const WIDTH: usize = size_of::<$t>();

            fn to_raw(self) -> u64 {
                self as u64
            }

            fn from_raw(raw: u64, width: usize) -> Self {
                let masked = if width >= 8 { raw } else { raw & ((1u64 << (8 * width)) - 1) };
                masked as $t
            }
        }
    )*};
}

macro_rules! impl_wire_sint {
    ($($t:ty),*) => {$(
        impl WireInt for $t {
            const WIDTH: usize = size_of::<$t>();

            fn to_raw(self) -> u64 {
                self as i64 as u64
            }

            fn from_raw(raw: u64, width: usize) -> Self {
                // Shift the encoded bits to the top and arithmetic-shift back
                // down so the value is sign-extended from its encoded width.
                let shift = 64 - 8 * width as u32;
                (((raw << shift) as i64) >> shift) as $t
            }
        }
    )*};
}

impl_wire_uint!(u8, u16, u32, u64);
impl_wire_sint!(i8, i16, i32, i64);

/// Encode `value` into the front of `dst`.
///
/// Writes exactly `T::WIDTH` bytes and reports that count; a larger
/// destination succeeds with its tail untouched, a smaller one is a size
/// error.
pub fn encode_int<T: WireInt>(value: T, dst: &mut [u8], endian: Endian) -> Result<usize> {
    let width = T::WIDTH;
    if dst.len() < width {
        return Err(Error::CodecSize(format!(
            "encode: destination too small: {} < {}",
            dst.len(),
            width
        )));
    }
    let raw = value.to_raw();
    for (i, slot) in dst.iter_mut().take(width).enumerate() {
        let shift = match endian {
            Endian::Big => 8 * (width - 1 - i),
            Endian::Little => 8 * i,
        };
        *slot = (raw >> shift) as u8;
    }
    Ok(width)
}

/// Decode an integer from the front of `src`, reporting the bytes consumed.
///
/// The consumed width is the largest power of two that fits both `T` and the
/// buffer, so an 8-byte buffer decoded into a `u16` consumes 2 bytes and a
/// 3-byte buffer decoded into a `u32` consumes 2 bytes. An empty buffer is a
/// size error.
pub fn decode_int<T: WireInt>(src: &[u8], endian: Endian) -> Result<(T, usize)> {
    if src.is_empty() {
        return Err(Error::CodecSize("decode: empty source buffer".into()));
    }
    let limit = src.len().min(T::WIDTH);
    // Largest power of two not exceeding `limit`; `limit` >= 1 here.
    let width = 1usize << (usize::BITS - 1 - limit.leading_zeros());

    let mut raw: u64 = 0;
    match endian {
        Endian::Big => {
            for &b in &src[..width] {
                raw = (raw << 8) | u64::from(b);
            }
        }
        Endian::Little => {
            for &b in src[..width].iter().rev() {
                raw = (raw << 8) | u64::from(b);
            }
        }
    }
    Ok((T::from_raw(raw, width), width))
}

/// Encode text into the front of `dst` as UTF-8, reporting bytes written.
///
/// Mirrors the integer contract: an oversized destination succeeds, a
/// destination smaller than the encoded form is a size error.
pub fn encode_text(text: &str, dst: &mut [u8]) -> Result<usize> {
    let bytes = text.as_bytes();
    if dst.len() < bytes.len() {
        return Err(Error::CodecSize(format!(
            "encode_text: destination too small: {} < {}",
            dst.len(),
            bytes.len()
        )));
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    Ok(bytes.len())
}

/// Decode transfer-encoded bytes into text.
///
/// Invalid byte sequences are an encoding error; no replacement characters
/// are substituted.
pub fn decode_text(bytes: &[u8]) -> Result<String> {
    match simdutf8::compat::from_utf8(bytes) {
        Ok(s) => Ok(s.to_owned()),
        Err(e) => Err(Error::Encoding(format!("invalid UTF-8: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: WireInt + PartialEq + std::fmt::Debug>(value: T, endian: Endian) {
        let mut buf = [0u8; 8];
        let written = encode_int(value, &mut buf, endian).unwrap();
        assert_eq!(written, T::WIDTH);
        let (decoded, consumed) = decode_int::<T>(&buf[..written], endian).unwrap();
        assert_eq!(consumed, T::WIDTH);
        assert_eq!(decoded, value);
    }

    #[test]
    fn round_trip_all_widths_both_endians() {
        for endian in [Endian::Big, Endian::Little] {
            for v in 0..=u8::MAX {
                round_trip(v, endian);
            }
            for v in i8::MIN..=i8::MAX {
                round_trip(v, endian);
            }
            for v in [0u16, 1, 0x9C00, u16::MAX] {
                round_trip(v, endian);
            }
            for v in [i16::MIN, -100, 0, 1, i16::MAX] {
                round_trip(v, endian);
            }
            for v in [0u32, 0x0102_0304, u32::MAX] {
                round_trip(v, endian);
            }
            for v in [i32::MIN, -100, 0, 0x0102_0304, i32::MAX] {
                round_trip(v, endian);
            }
            for v in [0u64, 0x0102_0304_0506_0708, u64::MAX] {
                round_trip(v, endian);
            }
            for v in [i64::MIN, -100, 0, 0x0102_0304_0506_0708, i64::MAX] {
                round_trip(v, endian);
            }
        }
    }

    #[test]
    fn known_byte_layout() {
        let mut buf = [0u8; 4];
        encode_int(0x0102_0304u32, &mut buf, Endian::Big).unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
        encode_int(0x0102_0304u32, &mut buf, Endian::Little).unwrap();
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn prefix_read_into_narrower_target() {
        let mut buf = [0u8; 8];
        encode_int(0x0102_0304_0506_0708u64, &mut buf, Endian::Big).unwrap();

        let (narrow, consumed) = decode_int::<u16>(&buf, Endian::Big).unwrap();
        assert_eq!(consumed, 2);
        let (prefix, _) = decode_int::<u16>(&buf[..2], Endian::Big).unwrap();
        assert_eq!(narrow, prefix);
        assert_eq!(narrow, 0x0102);
    }

    #[test]
    fn oversize_destination_tolerated() {
        let mut buf = [0xAAu8; 8];
        let written = encode_int(-100i32, &mut buf, Endian::Little).unwrap();
        assert_eq!(written, 4);
        assert_eq!(&buf[4..], &[0xAA; 4]);

        let (back, consumed) = decode_int::<i32>(&buf[..written], Endian::Little).unwrap();
        assert_eq!(back, -100);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn undersize_buffers_rejected() {
        let mut small = [0u8; 2];
        assert!(matches!(
            encode_int(1i32, &mut small, Endian::Big),
            Err(Error::CodecSize(_))
        ));
        assert!(matches!(
            decode_int::<i32>(&[], Endian::Big),
            Err(Error::CodecSize(_))
        ));
    }

    #[test]
    fn narrow_buffer_shrinks_to_fitting_width() {
        // 3-byte source with a 4-byte target: only a 2-byte decode fits.
        let mut buf = [0u8; 8];
        encode_int(-100i32, &mut buf, Endian::Little).unwrap();
        let (_, consumed) = decode_int::<i32>(&buf[..3], Endian::Little).unwrap();
        assert_eq!(consumed, 2);

        // 5-byte source with a 4-byte target still consumes the full 4 bytes.
        let (v, consumed) = decode_int::<i32>(&buf[..5], Endian::Little).unwrap();
        assert_eq!(v, -100);
        assert_eq!(consumed, 4);
    }

    #[test]
    fn sign_extension_from_narrow_decode() {
        let src = [0xFFu8, 0xFF];
        let (v, consumed) = decode_int::<i64>(&src, Endian::Big).unwrap();
        assert_eq!(consumed, 2);
        assert_eq!(v, -1);

        let (v, _) = decode_int::<u64>(&src, Endian::Big).unwrap();
        assert_eq!(v, 0xFFFF);
    }

    #[test]
    fn text_round_trip_multilingual() {
        for s in ["hello", "żółć", "привет", "データベース", "数据库"] {
            let mut buf = vec![0u8; s.len() + 8];
            let n = encode_text(s, &mut buf).unwrap();
            assert_eq!(n, s.len());
            assert_eq!(decode_text(&buf[..n]).unwrap(), s);
        }
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        assert!(matches!(
            decode_text(&[0xFF, 0xFE, 0x80]),
            Err(Error::Encoding(_))
        ));
        let mut tiny = [0u8; 2];
        assert!(matches!(
            encode_text("abc", &mut tiny),
            Err(Error::CodecSize(_))
        ));
    }
}
