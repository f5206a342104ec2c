//! Compact field-tagged payload encoding.
//!
//! Message payloads use the protocol-buffer wire format: a varint key per
//! field carrying `(field_number << 3) | wire_type`, followed by a varint,
//! fixed-width or length-delimited value. Only the wire-level structure lives
//! here; which fields mean what is up to the message builders and parsers.

use crate::codec;
use crate::error::{Error, Result};

/// Wire type tags.
pub mod wire_type {
    pub const VARINT: u8 = 0;
    pub const FIXED64: u8 = 1;
    pub const BYTES: u8 = 2;
    pub const FIXED32: u8 = 5;
}

/// ZigZag-encode a signed integer for `sint64` fields.
pub fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Reverse of [`zigzag`].
pub fn unzigzag(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Append a varint.
pub fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_key(out: &mut Vec<u8>, field: u32, wire: u8) {
    write_varint(out, (u64::from(field) << 3) | u64::from(wire));
}

/// Append a `uint32`/`uint64`/enum field.
pub fn write_uint_field(out: &mut Vec<u8>, field: u32, v: u64) {
    write_key(out, field, wire_type::VARINT);
    write_varint(out, v);
}

/// Append a `sint64` field (ZigZag encoded).
pub fn write_sint_field(out: &mut Vec<u8>, field: u32, v: i64) {
    write_key(out, field, wire_type::VARINT);
    write_varint(out, zigzag(v));
}

/// Append a `bool` field.
pub fn write_bool_field(out: &mut Vec<u8>, field: u32, v: bool) {
    write_uint_field(out, field, u64::from(v));
}

/// Append a length-delimited field.
pub fn write_bytes_field(out: &mut Vec<u8>, field: u32, data: &[u8]) {
    write_key(out, field, wire_type::BYTES);
    write_varint(out, data.len() as u64);
    out.extend_from_slice(data);
}

/// Append a `string` field.
pub fn write_str_field(out: &mut Vec<u8>, field: u32, s: &str) {
    write_bytes_field(out, field, s.as_bytes());
}

/// Append a `double` field.
pub fn write_double_field(out: &mut Vec<u8>, field: u32, v: f64) {
    write_key(out, field, wire_type::FIXED64);
    out.extend_from_slice(&v.to_bits().to_le_bytes());
}

/// Append a `float` field.
pub fn write_float_field(out: &mut Vec<u8>, field: u32, v: f32) {
    write_key(out, field, wire_type::FIXED32);
    out.extend_from_slice(&v.to_bits().to_le_bytes());
}

/// Append a nested message field, encoding the body with `f`.
pub fn write_nested<F: FnOnce(&mut Vec<u8>)>(out: &mut Vec<u8>, field: u32, f: F) {
    let mut body = Vec::new();
    f(&mut body);
    write_bytes_field(out, field, &body);
}

/// One decoded field value.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            FieldValue::Varint(v) => Ok(*v),
            other => Err(Error::Protocol(format!("expected varint, got {:?}", other))),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        let v = self.as_u64()?;
        u32::try_from(v).map_err(|_| Error::Protocol(format!("varint {} overflows u32", v)))
    }

    /// ZigZag-decoded `sint64` view.
    pub fn as_sint(&self) -> Result<i64> {
        Ok(unzigzag(self.as_u64()?))
    }

    pub fn as_bool(&self) -> Result<bool> {
        Ok(self.as_u64()? != 0)
    }

    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        match self {
            FieldValue::Bytes(b) => Ok(b),
            other => Err(Error::Protocol(format!(
                "expected length-delimited field, got {:?}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&'a str> {
        let bytes = self.as_bytes()?;
        simdutf8::compat::from_utf8(bytes)
            .map_err(|e| Error::Encoding(format!("invalid UTF-8 in field: {}", e)))
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            FieldValue::Fixed64(bits) => Ok(f64::from_bits(*bits)),
            other => Err(Error::Protocol(format!("expected fixed64, got {:?}", other))),
        }
    }

    pub fn as_f32(&self) -> Result<f32> {
        match self {
            FieldValue::Fixed32(bits) => Ok(f32::from_bits(*bits)),
            other => Err(Error::Protocol(format!("expected fixed32, got {:?}", other))),
        }
    }
}

/// A decoded field: tag number plus value.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub tag: u32,
    pub value: FieldValue<'a>,
}

/// Streaming reader over the fields of one message payload.
pub struct FieldReader<'a> {
    data: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn read_varint(&mut self) -> Result<u64> {
        let mut v: u64 = 0;
        let mut shift = 0u32;
        loop {
            let (&byte, rest) = self
                .data
                .split_first()
                .ok_or_else(|| Error::Protocol("truncated varint".into()))?;
            self.data = rest;
            if shift >= 64 {
                return Err(Error::Protocol("varint longer than 64 bits".into()));
            }
            v |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(Error::Protocol(format!(
                "truncated field: need {} bytes, have {}",
                n,
                self.data.len()
            )));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }

    /// Read the next field, or `None` at end of payload.
    pub fn next(&mut self) -> Result<Option<Field<'a>>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let key = self.read_varint()?;
        let tag = u32::try_from(key >> 3)
            .map_err(|_| Error::Protocol("field number overflows u32".into()))?;
        let wire = (key & 0x7) as u8;
        let value = match wire {
            wire_type::VARINT => FieldValue::Varint(self.read_varint()?),
            wire_type::FIXED64 => {
                let bytes = self.take(8)?;
                let (v, _) = codec::decode_int::<u64>(bytes, codec::Endian::Little)?;
                FieldValue::Fixed64(v)
            }
            wire_type::FIXED32 => {
                let bytes = self.take(4)?;
                let (v, _) = codec::decode_int::<u32>(bytes, codec::Endian::Little)?;
                FieldValue::Fixed32(v)
            }
            wire_type::BYTES => {
                let len = self.read_varint()?;
                let len = usize::try_from(len)
                    .map_err(|_| Error::Protocol("field length overflows usize".into()))?;
                FieldValue::Bytes(self.take(len)?)
            }
            other => {
                return Err(Error::Protocol(format!("unsupported wire type {}", other)));
            }
        };
        Ok(Some(Field { tag, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, v);
            let mut r = FieldReader::new(&buf);
            assert_eq!(r.read_varint().unwrap(), v);
            assert!(r.data.is_empty());
        }
    }

    #[test]
    fn zigzag_round_trip() {
        for v in [0i64, 1, -1, 2, -2, i64::MAX, i64::MIN] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn field_stream() {
        let mut buf = Vec::new();
        write_uint_field(&mut buf, 1, 42);
        write_str_field(&mut buf, 2, "abc");
        write_double_field(&mut buf, 3, 1.5);
        write_sint_field(&mut buf, 4, -7);

        let mut r = FieldReader::new(&buf);
        let f = r.next().unwrap().unwrap();
        assert_eq!((f.tag, f.value.as_u64().unwrap()), (1, 42));
        let f = r.next().unwrap().unwrap();
        assert_eq!((f.tag, f.value.as_str().unwrap()), (2, "abc"));
        let f = r.next().unwrap().unwrap();
        assert_eq!(f.tag, 3);
        assert!((f.value.as_f64().unwrap() - 1.5).abs() < f64::EPSILON);
        let f = r.next().unwrap().unwrap();
        assert_eq!((f.tag, f.value.as_sint().unwrap()), (4, -7));
        assert!(r.next().unwrap().is_none());
    }

    #[test]
    fn truncated_payload_is_a_protocol_error() {
        let mut buf = Vec::new();
        write_bytes_field(&mut buf, 1, b"hello");
        buf.truncate(buf.len() - 2);
        let mut r = FieldReader::new(&buf);
        assert!(r.next().is_err());
    }
}
