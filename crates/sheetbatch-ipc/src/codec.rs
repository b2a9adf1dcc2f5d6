//! Little-endian envelope codec.
//!
//! Field order: `messageType:u8, messageValue:string, N:i32,
//! numParameters:i32, groupCount:i32, [count:i32, values…]…,
//! resultCount:i32, values…`. A value is `cols:i32, rows:i32, flags:u8`
//! followed by its payload. Strings carry a 7-bit varint byte length.
//! Numbers travel as `f32`.

use bitflags::bitflags;
use sheetbatch_common::{ErrorKind, Payload, TaggedValue};

use crate::envelope::{Envelope, MessageType};
use crate::error::CodecError;

type Result<T> = std::result::Result<T, CodecError>;

bitflags! {
    /// Type byte of an encoded value.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u8 {
        const ARRAY        = 0x01;
        const UNIT         = 0x02;
        const MAPPED_RANGE = 0x04;
        const ERROR        = 0x08;
        const EMPTY        = 0x10;
        const FLOAT        = 0x20;
        const STRING       = 0x40;
    }
}

pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64);
    encode_into(envelope, &mut out)?;
    Ok(out)
}

/// Append the encoding of `envelope` to `out`.
pub fn encode_into(envelope: &Envelope, out: &mut Vec<u8>) -> Result<()> {
    let mut w = Writer { out };
    w.put_u8(envelope.message_type.into());
    w.put_str(envelope.message_value.as_deref().unwrap_or_default())?;
    w.put_i32(envelope.instances);
    w.put_i32(envelope.num_parameters);

    match &envelope.parameters {
        None => w.put_i32(0),
        Some(groups) => {
            w.put_count("parameter groups", groups.len())?;
            for group in groups {
                w.put_count("parameters", group.len())?;
                for value in group {
                    w.put_value(value)?;
                }
            }
        }
    }

    match &envelope.results {
        None => w.put_i32(0),
        Some(results) => {
            w.put_count("results", results.len())?;
            for value in results {
                w.put_value(value)?;
            }
        }
    }
    Ok(())
}

pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    let mut cur = Cursor::new(bytes);
    let message_type = MessageType::try_from(cur.read_u8()?)?;
    let value = cur.read_string()?;
    let instances = cur.read_i32()?;
    let num_parameters = cur.read_i32()?;

    let groups = cur.read_count("parameter group")?;
    let parameters = if groups == 0 {
        None
    } else {
        let mut out = Vec::with_capacity(groups.min(cur.remaining() / 4));
        for _ in 0..groups {
            let count = cur.read_count("parameter")?;
            out.push(cur.read_values(count)?);
        }
        Some(out)
    };

    let count = cur.read_count("result")?;
    let results = if count == 0 {
        None
    } else {
        Some(cur.read_values(count)?)
    };

    Ok(Envelope {
        message_type,
        message_value: (!value.is_empty()).then_some(value),
        instances,
        num_parameters,
        parameters,
        results,
    })
}

struct Writer<'a> {
    out: &'a mut Vec<u8>,
}

impl Writer<'_> {
    fn put_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    fn put_i32(&mut self, v: i32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f32(&mut self, v: f32) {
        self.out.extend_from_slice(&v.to_le_bytes());
    }

    fn put_count(&mut self, what: &'static str, len: usize) -> Result<()> {
        let n = i32::try_from(len).map_err(|_| CodecError::Oversized { what, len })?;
        self.put_i32(n);
        Ok(())
    }

    fn put_str(&mut self, s: &str) -> Result<()> {
        let len = s.len();
        let mut n = u32::try_from(len)
            .ok()
            .filter(|n| *n <= i32::MAX as u32)
            .ok_or(CodecError::Oversized { what: "string", len })?;
        while n >= 0x80 {
            self.put_u8((n as u8) | 0x80);
            n >>= 7;
        }
        self.put_u8(n as u8);
        self.out.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn put_value(&mut self, value: &TaggedValue) -> Result<()> {
        let dim = |what, n: u32| {
            i32::try_from(n).map_err(|_| CodecError::Oversized {
                what,
                len: n as usize,
            })
        };
        self.put_i32(dim("columns", value.cols())?);
        self.put_i32(dim("rows", value.rows())?);

        match value.payload() {
            Payload::Float(n) => {
                self.put_u8((TypeFlags::UNIT | TypeFlags::FLOAT).bits());
                self.put_f32(*n as f32);
            }
            Payload::Text(s) => {
                self.put_u8((TypeFlags::UNIT | TypeFlags::STRING).bits());
                self.put_str(s)?;
            }
            Payload::Error(kind) => {
                self.put_u8((TypeFlags::UNIT | TypeFlags::ERROR | TypeFlags::STRING).bits());
                self.put_str(kind.as_str())?;
            }
            Payload::Empty => self.put_u8(TypeFlags::EMPTY.bits()),
            Payload::FloatArray(data) => {
                self.put_u8((TypeFlags::ARRAY | TypeFlags::FLOAT).bits());
                self.put_i64(data.len() as i64);
                for n in data {
                    self.put_f32(*n as f32);
                }
            }
            Payload::TextArray(data) => {
                self.put_u8((TypeFlags::ARRAY | TypeFlags::STRING).bits());
                self.put_i64(data.len() as i64);
                for s in data {
                    self.put_str(s)?;
                }
            }
            Payload::RangeRef { .. } => return Err(CodecError::UnresolvedRange),
        }
        Ok(())
    }
}

/// Bounded cursor over an encoded envelope.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(CodecError::UnexpectedEof {
                at: self.pos,
                need: n,
                rem: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.bytes[start..self.pos])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let raw = self.read_exact(N)?;
        let mut buf = [0_u8; N];
        buf.copy_from_slice(raw);
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_exact(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    fn read_count(&mut self, what: &'static str) -> Result<usize> {
        let at = self.pos;
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| CodecError::NegativeCount {
            what,
            count: count.into(),
            at,
        })
    }

    fn read_string(&mut self) -> Result<String> {
        let at = self.pos;
        let mut len: u32 = 0;
        let mut shift = 0;
        loop {
            if shift >= 35 {
                return Err(CodecError::InvalidLength { at });
            }
            let byte = self.read_u8()?;
            len |= u32::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        if len > i32::MAX as u32 {
            return Err(CodecError::InvalidLength { at });
        }
        let start = self.pos;
        let raw = self.read_exact(len as usize)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { at: start })
    }

    fn read_values(&mut self, count: usize) -> Result<Vec<TaggedValue>> {
        // each value needs at least its 9-byte header
        let mut out = Vec::with_capacity(count.min(self.remaining() / 9));
        for _ in 0..count {
            out.push(self.read_value()?);
        }
        Ok(out)
    }

    fn read_value(&mut self) -> Result<TaggedValue> {
        let cols = self.read_i32()?;
        let rows = self.read_i32()?;
        let at = self.pos;
        let raw = self.read_u8()?;
        let invalid = CodecError::InvalidTypeFlags { flags: raw, at };
        let Some(flags) = TypeFlags::from_bits(raw) else {
            return Err(invalid);
        };

        let number = TypeFlags::UNIT | TypeFlags::FLOAT;
        let text = TypeFlags::UNIT | TypeFlags::STRING;
        let numbers = TypeFlags::ARRAY | TypeFlags::FLOAT;
        let texts = TypeFlags::ARRAY | TypeFlags::STRING;

        if flags == TypeFlags::EMPTY {
            Ok(TaggedValue::empty())
        } else if flags == number {
            Ok(TaggedValue::number(f64::from(self.read_f32()?)))
        } else if flags == text {
            Ok(TaggedValue::text(self.read_string()?))
        } else if flags == text | TypeFlags::ERROR {
            let marker = self.read_string()?;
            ErrorKind::parse(&marker)
                .map(TaggedValue::error)
                .ok_or(CodecError::UnknownErrorMarker(marker))
        } else if flags == numbers || flags == texts {
            self.read_array_value(rows, cols, flags == numbers)
        } else {
            Err(invalid)
        }
    }

    fn read_array_value(&mut self, rows: i32, cols: i32, numeric: bool) -> Result<TaggedValue> {
        let at = self.pos;
        let count = self.read_i64()?;
        if count < 0 {
            return Err(CodecError::NegativeCount {
                what: "element",
                count,
                at,
            });
        }
        let mismatch = CodecError::CountMismatch { rows, cols, count };
        let (Ok(r), Ok(c)) = (u32::try_from(rows), u32::try_from(cols)) else {
            return Err(mismatch);
        };
        if u64::from(r) * u64::from(c) != count as u64 {
            return Err(mismatch);
        }

        let n = count as usize;
        let shaped = if numeric {
            let mut data = Vec::with_capacity(n.min(self.remaining() / 4));
            for _ in 0..n {
                data.push(f64::from(self.read_f32()?));
            }
            TaggedValue::float_array(r, c, data)
        } else {
            let mut data = Vec::with_capacity(n.min(self.remaining()));
            for _ in 0..n {
                data.push(self.read_string()?);
            }
            TaggedValue::text_array(r, c, data)
        };
        shaped.map_err(|_| mismatch)
    }
}
