//! Minimal protobuf wire-format reader and writer.
//!
//! Only what the manifest needs: varints, length-delimited payloads, and
//! skipping of fixed32/fixed64 fields. Positions in errors are absolute
//! offsets into the outermost buffer so nested messages report usefully.

use crate::error::DecodeError;

const WT_VARINT: u8 = 0;
const WT_FIXED64: u8 = 1;
const WT_LEN: u8 = 2;
const WT_FIXED32: u8 = 5;

/// Maximum encoded length of a 64-bit varint.
const MAX_VARINT_LEN: usize = 10;

/// One decoded field value. `Len` borrows from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value<'a> {
    Varint(u64),
    Fixed64(u64),
    Len(&'a [u8]),
    Fixed32(u32),
}

impl Value<'_> {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Value::Varint(_) => "varint",
            Value::Fixed64(_) => "fixed64",
            Value::Len(_) => "length-delimited",
            Value::Fixed32(_) => "fixed32",
        }
    }
}

/// A field as it appeared on the wire, with the absolute offset of its
/// payload (used as `base` when the payload is itself a message).
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    pub number: u32,
    pub value: Value<'a>,
    pub pos: usize,
}

impl<'a> Field<'a> {
    pub fn as_u64(&self) -> Result<u64, DecodeError> {
        match self.value {
            Value::Varint(v) => Ok(v),
            other => Err(self.mismatch("varint", other)),
        }
    }

    /// Reads an `int64` field that must be non-negative.
    pub fn as_non_negative(&self) -> Result<u64, DecodeError> {
        let v = self.as_u64()?;
        if v > i64::MAX as u64 {
            return Err(DecodeError::OutOfRange { field: self.number, value: v, pos: self.pos });
        }
        Ok(v)
    }

    pub fn as_bytes(&self) -> Result<&'a [u8], DecodeError> {
        match self.value {
            Value::Len(b) => Ok(b),
            other => Err(self.mismatch("length-delimited", other)),
        }
    }

    pub fn as_str(&self) -> Result<&'a str, DecodeError> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|_| DecodeError::InvalidUtf8 { field: self.number, pos: self.pos })
    }

    /// Reader over a nested message payload.
    pub fn as_message(&self) -> Result<Reader<'a>, DecodeError> {
        Ok(Reader::with_base(self.as_bytes()?, self.pos))
    }

    fn mismatch(&self, expected: &'static str, found: Value<'_>) -> DecodeError {
        DecodeError::WireTypeMismatch {
            field: self.number,
            expected,
            found: found.wire_name(),
            pos: self.pos,
        }
    }
}

/// Sequential field reader over one message.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_base(buf, 0)
    }

    fn with_base(buf: &'a [u8], base: usize) -> Self {
        Self { buf, pos: 0, base }
    }

    fn abs(&self) -> usize {
        self.base + self.pos
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.abs();
        let mut val: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(DecodeError::Truncated { what: "varint", pos: start });
            };
            self.pos += 1;
            let low = (byte & 0x7F) as u64;
            // The tenth byte may only contribute the top bit.
            if i == MAX_VARINT_LEN - 1 && low > 1 {
                return Err(DecodeError::VarintOverflow { pos: start });
            }
            val |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(val);
            }
        }
        Err(DecodeError::VarintOverflow { pos: start })
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], DecodeError> {
        let start = self.abs();
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(DecodeError::Truncated { what, pos: start })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Next field, or `None` at the end of the message.
    pub fn next_field(&mut self) -> Result<Option<Field<'a>>, DecodeError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let key_pos = self.abs();
        let key = self.varint()?;
        let wire_type = (key & 0x7) as u8;
        let number = key >> 3;
        if number == 0 {
            return Err(DecodeError::ZeroField { pos: key_pos });
        }
        if number > u32::MAX as u64 >> 3 {
            return Err(DecodeError::OutOfRange { field: 0, value: number, pos: key_pos });
        }
        let number = number as u32;
        let pos = self.abs();
        let value = match wire_type {
            WT_VARINT => Value::Varint(self.varint()?),
            WT_FIXED64 => {
                let b = self.take(8, "fixed64")?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Value::Fixed64(u64::from_le_bytes(arr))
            }
            WT_LEN => {
                let len = self.varint()?;
                let len = usize::try_from(len)
                    .map_err(|_| DecodeError::OutOfRange { field: number, value: len, pos })?;
                let payload_pos = self.abs();
                let b = self.take(len, "length-delimited field")?;
                return Ok(Some(Field { number, value: Value::Len(b), pos: payload_pos }));
            }
            WT_FIXED32 => {
                let b = self.take(4, "fixed32")?;
                let mut arr = [0u8; 4];
                arr.copy_from_slice(b);
                Value::Fixed32(u32::from_le_bytes(arr))
            }
            other => return Err(DecodeError::UnsupportedWireType { wire_type: other, pos: key_pos }),
        };
        Ok(Some(Field { number, value, pos }))
    }
}

/// Append-only message writer, the mirror of [`Reader`].
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_varint(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8 & 0x7F) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    fn key(&mut self, field: u32, wire_type: u8) {
        self.put_varint(((field as u64) << 3) | wire_type as u64);
    }

    pub fn varint(&mut self, field: u32, v: u64) -> &mut Self {
        self.key(field, WT_VARINT);
        self.put_varint(v);
        self
    }

    pub fn bytes(&mut self, field: u32, b: &[u8]) -> &mut Self {
        self.key(field, WT_LEN);
        self.put_varint(b.len() as u64);
        self.buf.extend_from_slice(b);
        self
    }

    pub fn string(&mut self, field: u32, s: &str) -> &mut Self {
        self.bytes(field, s.as_bytes())
    }

    pub fn message(&mut self, field: u32, inner: Writer) -> &mut Self {
        self.bytes(field, &inner.buf)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_varint_and_string_fields() {
        let mut w = Writer::new();
        w.varint(2, 300).string(1, "a/b.bin");
        let bytes = w.finish();

        let mut r = Reader::new(&bytes);
        let f = r.next_field().unwrap().unwrap();
        assert_eq!(f.number, 2);
        assert_eq!(f.as_u64().unwrap(), 300);
        let f = r.next_field().unwrap().unwrap();
        assert_eq!(f.number, 1);
        assert_eq!(f.as_str().unwrap(), "a/b.bin");
        assert!(r.next_field().unwrap().is_none());
    }

    #[test]
    fn skips_fixed_width_fields() {
        // field 7 fixed64, field 8 fixed32, field 1 varint
        let mut bytes = vec![(7 << 3) | 1];
        bytes.extend_from_slice(&42u64.to_le_bytes());
        bytes.push((8 << 3) | 5);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&[1 << 3, 5]);

        let mut r = Reader::new(&bytes);
        assert_eq!(r.next_field().unwrap().unwrap().value, Value::Fixed64(42));
        assert_eq!(r.next_field().unwrap().unwrap().value, Value::Fixed32(7));
        assert_eq!(r.next_field().unwrap().unwrap().as_u64().unwrap(), 5);
    }

    #[test]
    fn truncated_payload_is_reported() {
        // field 1, len 5, only 2 bytes present
        let bytes = [(1 << 3) | 2, 5, b'a', b'b'];
        let err = Reader::new(&bytes).next_field().unwrap_err();
        assert_eq!(err, DecodeError::Truncated { what: "length-delimited field", pos: 2 });
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let bytes: [u8; 11] = [0x08, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        let err = Reader::new(&bytes).next_field().unwrap_err();
        assert_eq!(err, DecodeError::VarintOverflow { pos: 1 });
    }

    #[test]
    fn groups_are_unsupported() {
        let bytes: [u8; 1] = [(1 << 3) | 3];
        let err = Reader::new(&bytes).next_field().unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedWireType { wire_type: 3, pos: 0 });
    }

    #[test]
    fn nested_positions_are_absolute() {
        let mut inner = Writer::new();
        inner.string(1, "x");
        let mut outer = Writer::new();
        outer.varint(3, 1).message(4, inner);
        let bytes = outer.finish();

        let mut r = Reader::new(&bytes);
        r.next_field().unwrap();
        let msg = r.next_field().unwrap().unwrap();
        assert_eq!(msg.pos, 4);
        let mut nested = msg.as_message().unwrap();
        let f = nested.next_field().unwrap().unwrap();
        assert_eq!(f.pos, 6);
    }

    #[test]
    fn negative_int64_is_out_of_range() {
        let mut w = Writer::new();
        w.varint(2, u64::MAX);
        let bytes = w.finish();
        let f = Reader::new(&bytes).next_field().unwrap().unwrap();
        assert!(matches!(f.as_non_negative(), Err(DecodeError::OutOfRange { field: 2, .. })));
    }
}
