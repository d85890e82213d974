// Protobuf wire format uses fixed bit-width operations:
// - Varint encoding: 7 bits per byte with continuation bit
// - Wire types: 3 bits (0-7), field numbers: remaining bits
// - All casts are bounded by the protocol specification.

use protogate_types::error::CodecError;

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_FIXED64: u8 = 1;
pub const WIRE_LEN: u8 = 2;
pub const WIRE_FIXED32: u8 = 5;

/// Protobuf Varint encode, appended to `buf`.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value & 0x7F | 0x80) as u8);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Append a field tag (field number + wire type).
pub fn put_tag(buf: &mut Vec<u8>, field: u32, wire_type: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type));
}

/// Append a length-delimited string field.
pub fn put_str_field(buf: &mut Vec<u8>, field: u32, value: &str) {
    put_tag(buf, field, WIRE_LEN);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

/// Append a varint field.
pub fn put_varint_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    put_tag(buf, field, WIRE_VARINT);
    put_varint(buf, value);
}

/// Append a fixed64 field carrying an f64 (little-endian IEEE-754 bits).
pub fn put_double_field(buf: &mut Vec<u8>, field: u32, value: f64) {
    put_tag(buf, field, WIRE_FIXED64);
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Append a length-delimited nested message field.
pub fn put_msg_field(buf: &mut Vec<u8>, field: u32, msg: &[u8]) {
    put_tag(buf, field, WIRE_LEN);
    put_varint(buf, msg.len() as u64);
    buf.extend_from_slice(msg);
}

/// Read a Protobuf Varint at `offset`, returning (value, next offset).
pub fn read_varint(data: &[u8], offset: usize) -> Result<(u64, usize), CodecError> {
    let mut result = 0u64;
    let mut shift = 0u32;
    let mut pos = offset;

    loop {
        if pos >= data.len() {
            return Err(CodecError::malformed("truncated varint"));
        }
        if shift >= 64 {
            return Err(CodecError::malformed("varint overflows 64 bits"));
        }
        let byte = data[pos];
        result |= u64::from(byte & 0x7F) << shift;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    Ok((result, pos))
}

/// Skip over one field's payload, returning the offset past it.
pub fn skip_field(data: &[u8], offset: usize, wire_type: u8) -> Result<usize, CodecError> {
    match wire_type {
        WIRE_VARINT => {
            let (_, next) = read_varint(data, offset)?;
            Ok(next)
        }
        WIRE_FIXED64 => {
            if offset + 8 > data.len() {
                return Err(CodecError::malformed("truncated 64-bit field"));
            }
            Ok(offset + 8)
        }
        WIRE_LEN => {
            let (length, content_offset) = read_varint(data, offset)?;
            let end = content_offset
                .checked_add(length as usize)
                .ok_or_else(|| CodecError::malformed("length-delimited field overflows"))?;
            if end > data.len() {
                return Err(CodecError::malformed("truncated length-delimited field"));
            }
            Ok(end)
        }
        WIRE_FIXED32 => {
            if offset + 4 > data.len() {
                return Err(CodecError::malformed("truncated 32-bit field"));
            }
            Ok(offset + 4)
        }
        other => Err(CodecError::malformed(format!("unknown wire type: {}", other))),
    }
}

/// One decoded field within a message.
pub struct WireField<'a> {
    pub field: u32,
    pub wire_type: u8,
    data: &'a [u8],
    /// Offset of the field payload (past the tag)
    payload: usize,
}

impl<'a> WireField<'a> {
    pub fn as_varint(&self) -> Result<u64, CodecError> {
        let (value, _) = read_varint(self.data, self.payload)?;
        Ok(value)
    }

    pub fn as_double(&self) -> Result<f64, CodecError> {
        if self.wire_type != WIRE_FIXED64 || self.payload + 8 > self.data.len() {
            return Err(CodecError::malformed("field is not a fixed64"));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[self.payload..self.payload + 8]);
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn as_bytes(&self) -> Result<&'a [u8], CodecError> {
        if self.wire_type != WIRE_LEN {
            return Err(CodecError::malformed("field is not length-delimited"));
        }
        let (length, content_offset) = read_varint(self.data, self.payload)?;
        let end = content_offset
            .checked_add(length as usize)
            .ok_or_else(|| CodecError::malformed("length-delimited field overflows"))?;
        if end > self.data.len() {
            return Err(CodecError::malformed("truncated length-delimited field"));
        }
        Ok(&self.data[content_offset..end])
    }

    pub fn as_str(&self) -> Result<&'a str, CodecError> {
        std::str::from_utf8(self.as_bytes()?)
            .map_err(|_| CodecError::malformed("string field is not valid UTF-8"))
    }
}

/// Iterate the fields of one message. Unknown fields are yielded like any
/// other so decoders can skip them instead of failing.
pub struct FieldIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<WireField<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let (tag, payload) = match read_varint(self.data, self.offset) {
            Ok(v) => v,
            Err(e) => {
                self.offset = self.data.len();
                return Some(Err(e));
            }
        };
        let wire_type = (tag & 7) as u8;
        let field = (tag >> 3) as u32;
        match skip_field(self.data, payload, wire_type) {
            Ok(next) => {
                self.offset = next;
                Some(Ok(WireField { field, wire_type, data: self.data, payload }))
            }
            Err(e) => {
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}
