//! Protobuf-compatible binary codec.
//!
//! Encodes [`Record`] with the protobuf wire format of this schema:
//!
//! ```text
//! message Person {
//!   string name = 1;
//!   int32 age = 2;
//!   optional string email = 3;
//!   repeated string tags = 4;
//! }
//! ```
//!
//! proto3 rules apply: an empty `name` and a zero `age` are not written, so
//! the default record encodes to zero bytes. Unknown fields with a valid
//! wire type are skipped on decode.

use super::Codec;
use crate::error::DecodeError;
use crate::record::Record;
use bytes::{BufMut, Bytes, BytesMut};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;
const WIRE_FIXED32: u8 = 5;

const FIELD_NAME: u32 = 1;
const FIELD_AGE: u32 = 2;
const FIELD_EMAIL: u32 = 3;
const FIELD_TAGS: u32 = 4;

/// Longest valid varint encoding of a u64.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn encode(&self, record: &Record) -> Bytes {
        let mut buf = BytesMut::with_capacity(encoded_len_hint(record));

        if !record.name.is_empty() {
            put_string(&mut buf, FIELD_NAME, &record.name);
        }
        if record.age != 0 {
            put_tag(&mut buf, FIELD_AGE, WIRE_VARINT);
            // int32 negatives are sign-extended to 64 bits on the wire
            put_varint(&mut buf, record.age as i64 as u64);
        }
        if let Some(email) = &record.email {
            put_string(&mut buf, FIELD_EMAIL, email);
        }
        for tag in &record.tags {
            put_string(&mut buf, FIELD_TAGS, tag);
        }

        buf.freeze()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record, DecodeError> {
        let mut reader = Reader::new(bytes);
        let mut record = Record::default();

        while !reader.is_empty() {
            let offset = reader.pos;
            let key = reader.varint()?;
            let wire_type = (key & 0x7) as u8;
            let field = key >> 3;

            if field == 0 || field > u32::MAX as u64 || !is_valid_wire_type(wire_type) {
                return Err(DecodeError::InvalidTag { tag: key, offset });
            }
            let field = field as u32;

            let expected = match field {
                FIELD_NAME | FIELD_EMAIL | FIELD_TAGS => Some(WIRE_LEN),
                FIELD_AGE => Some(WIRE_VARINT),
                _ => None,
            };
            if let Some(expected) = expected {
                if expected != wire_type {
                    return Err(DecodeError::WireTypeMismatch {
                        field,
                        expected,
                        actual: wire_type,
                        offset,
                    });
                }
            }

            match field {
                FIELD_NAME => record.name = reader.string()?,
                FIELD_AGE => record.age = to_int32(reader.varint()?)?,
                FIELD_EMAIL => record.email = Some(reader.string()?),
                FIELD_TAGS => record.tags.push(reader.string()?),
                _ => reader.skip(wire_type)?,
            }
        }

        Ok(record)
    }
}

fn is_valid_wire_type(wire_type: u8) -> bool {
    matches!(wire_type, WIRE_VARINT | WIRE_FIXED64 | WIRE_LEN | WIRE_FIXED32)
}

fn to_int32(value: u64) -> Result<i32, DecodeError> {
    i32::try_from(value as i64).map_err(|_| DecodeError::AgeOutOfRange { value })
}

fn encoded_len_hint(record: &Record) -> usize {
    let strings = record.name.len()
        + record.email.as_ref().map_or(0, String::len)
        + record.tags.iter().map(String::len).sum::<usize>();
    // tag + one length byte per string field, plus the age varint
    strings + 2 * (2 + record.tags.len()) + 1 + MAX_VARINT_LEN
}

fn put_tag(buf: &mut BytesMut, field: u32, wire_type: u8) {
    put_varint(buf, ((field as u64) << 3) | wire_type as u64);
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_string(buf: &mut BytesMut, field: u32, value: &str) {
    put_tag(buf, field, WIRE_LEN);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

/// Cursor over an encoded message.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;

        for i in 0..MAX_VARINT_LEN {
            let byte = match self.buf.get(self.pos) {
                Some(b) => *b,
                None => {
                    return Err(DecodeError::Truncated {
                        offset: self.pos,
                        needed: 1,
                    })
                }
            };
            self.pos += 1;
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }

        Err(DecodeError::VarintOverflow { offset: start })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn length_delimited(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.varint()?;
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        self.take(len)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.length_delimited()?;
        let start = self.pos - bytes.len();
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_owned()),
            Err(e) => Err(DecodeError::Utf8 {
                valid_up_to: start + e.valid_up_to(),
                source: e,
            }),
        }
    }

    fn skip(&mut self, wire_type: u8) -> Result<(), DecodeError> {
        match wire_type {
            WIRE_VARINT => self.varint().map(drop),
            WIRE_FIXED64 => self.take(8).map(drop),
            WIRE_LEN => self.length_delimited().map(drop),
            WIRE_FIXED32 => self.take(4).map(drop),
            _ => Err(DecodeError::InvalidTag {
                tag: wire_type as u64,
                offset: self.pos,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encoding() {
        let record = Record::new("Harsha", 24);
        assert_eq!(&BinaryCodec.encode(&record)[..], b"\x0a\x06Harsha\x10\x18");
    }

    #[test]
    fn test_default_record_is_empty() {
        assert!(BinaryCodec.encode(&Record::default()).is_empty());
        assert_eq!(BinaryCodec.decode(b"").unwrap(), Record::default());
    }

    #[test]
    fn test_negative_age_sign_extended() {
        let encoded = BinaryCodec.encode(&Record::new("", -1));
        assert_eq!(&encoded[..], b"\x10\xff\xff\xff\xff\xff\xff\xff\xff\xff\x01");
        assert_eq!(BinaryCodec.decode(&encoded).unwrap().age, -1);
    }

    #[test]
    fn test_email_presence_preserved() {
        let record = Record::new("a", 1).with_email("");
        let encoded = BinaryCodec.encode(&record);
        assert_eq!(&encoded[..], b"\x0a\x01a\x10\x01\x1a\x00");
        assert_eq!(BinaryCodec.decode(&encoded).unwrap().email, Some(String::new()));
    }

    #[test]
    fn test_skips_unknown_fields() {
        // name = "A", field 9 varint, field 10 fixed32, field 11 bytes, age = 3
        let input = b"\x0a\x01A\x48\x05\x55\x01\x02\x03\x04\x5a\x02zz\x10\x03";
        assert_eq!(BinaryCodec.decode(input).unwrap(), Record::new("A", 3));
    }

    #[test]
    fn test_truncated_string() {
        match BinaryCodec.decode(b"\x0a\x05ab") {
            Err(DecodeError::Truncated { offset: 2, needed: 3 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_varint() {
        match BinaryCodec.decode(b"\x10\x80") {
            Err(DecodeError::Truncated { offset: 2, needed: 1 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_varint_overflow() {
        match BinaryCodec.decode(b"\x10\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\x01") {
            Err(DecodeError::VarintOverflow { offset: 1 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_tags() {
        // field number 0
        match BinaryCodec.decode(b"\x02\x00") {
            Err(DecodeError::InvalidTag { tag: 0x02, offset: 0 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
        // deprecated group wire type
        match BinaryCodec.decode(b"\x10\x01\x0b") {
            Err(DecodeError::InvalidTag { tag: 0x0b, offset: 2 }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_wire_type_mismatch() {
        match BinaryCodec.decode(b"\x08\x01") {
            Err(DecodeError::WireTypeMismatch {
                field: 1,
                expected: WIRE_LEN,
                actual: WIRE_VARINT,
                offset: 0,
            }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8() {
        match BinaryCodec.decode(b"\x10\x01\x22\x03ok\xff") {
            Err(DecodeError::Utf8 { valid_up_to: 6, .. }) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_age_out_of_range() {
        // 2^40
        match BinaryCodec.decode(b"\x10\x80\x80\x80\x80\x80\x20") {
            Err(DecodeError::AgeOutOfRange { value }) => assert_eq!(value, 1 << 40),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
