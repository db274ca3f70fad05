//! Value decoding
//!
//! Every read is bounds-checked: reading past the end of a logical message is
//! a decode error rather than a panic. Unknown tags are rejected explicitly.

use std::collections::BTreeMap;

use bytes::Buf;

use super::value::{
    Date, DateTime, Decimal, Direction, GraphAnon, GraphEdge, GraphNode, GraphPath,
    GraphPathSegment, Iri, StringDatatype, StringLang, Time,
};
use super::{DataType, Value};
use crate::error::{DriverError, DriverResult};

/// Nesting limit for lists, maps and paths.
pub const MAX_DEPTH: usize = 256;

/// Decodes one tagged value per logical message.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageDecoder;

impl MessageDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a complete logical message. Trailing bytes are an error.
    pub fn decode(&self, data: &[u8]) -> DriverResult<Value> {
        let mut buf = data;
        let value = decode_value(&mut buf, 0)?;
        if buf.has_remaining() {
            return Err(DriverError::Decode(format!(
                "{} trailing bytes after message value",
                buf.remaining()
            )));
        }
        Ok(value)
    }
}

fn ensure(buf: &&[u8], n: usize) -> DriverResult<()> {
    if buf.remaining() < n {
        return Err(DriverError::Decode(format!(
            "attempted to read {} bytes past the end of the buffer ({} remaining)",
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_u8(buf: &mut &[u8]) -> DriverResult<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u32(buf: &mut &[u8]) -> DriverResult<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn read_i64(buf: &mut &[u8]) -> DriverResult<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

fn read_len(buf: &mut &[u8]) -> DriverResult<usize> {
    Ok(read_u32(buf)? as usize)
}

/// A `u32` length followed by that many bytes of UTF-8, with no tag.
fn read_string(buf: &mut &[u8]) -> DriverResult<String> {
    let len = read_len(buf)?;
    ensure(buf, len)?;
    let (bytes, rest) = buf.split_at(len);
    let s = std::str::from_utf8(bytes)
        .map_err(|e| DriverError::Decode(format!("invalid UTF-8 string: {}", e)))?
        .to_string();
    *buf = rest;
    Ok(s)
}

fn read_i64s<const N: usize>(buf: &mut &[u8]) -> DriverResult<[i64; N]> {
    let mut fields = [0i64; N];
    for field in fields.iter_mut() {
        *field = read_i64(buf)?;
    }
    Ok(fields)
}

fn decode_value(buf: &mut &[u8], depth: usize) -> DriverResult<Value> {
    if depth > MAX_DEPTH {
        return Err(DriverError::Decode(format!(
            "values nested deeper than {} levels",
            MAX_DEPTH
        )));
    }

    let tag = DataType::try_from(read_u8(buf)?)?;
    let value = match tag {
        DataType::Null => Value::Null,
        DataType::BoolFalse => Value::Bool(false),
        DataType::BoolTrue => Value::Bool(true),
        DataType::UInt8 => Value::UInt8(read_u8(buf)?),
        DataType::UInt16 => {
            ensure(buf, 2)?;
            Value::UInt16(buf.get_u16())
        }
        DataType::UInt32 => Value::UInt32(read_u32(buf)?),
        DataType::UInt64 => {
            ensure(buf, 8)?;
            Value::UInt64(buf.get_u64())
        }
        DataType::Int64 => Value::Int64(read_i64(buf)?),
        DataType::Float => {
            ensure(buf, 4)?;
            Value::Float(buf.get_f32())
        }
        DataType::Double => {
            ensure(buf, 8)?;
            Value::Double(buf.get_f64())
        }
        DataType::Decimal => Value::Decimal(Decimal::new(read_string(buf)?)),
        DataType::String => Value::String(read_string(buf)?),
        DataType::StringLang => {
            let value = read_string(buf)?;
            let lang = read_string(buf)?;
            Value::StringLang(StringLang { value, lang })
        }
        DataType::StringDatatype => {
            let value = read_string(buf)?;
            let datatype = read_string(buf)?;
            Value::StringDatatype(StringDatatype { value, datatype })
        }
        DataType::Iri => Value::Iri(Iri::new(read_string(buf)?)),
        DataType::NamedNode => Value::NamedNode(GraphNode::new(read_string(buf)?)),
        DataType::Edge => Value::Edge(GraphEdge::new(read_string(buf)?)),
        DataType::Anon => Value::Anon(GraphAnon::new(read_string(buf)?)),
        DataType::Date => {
            let [year, month, day, tz_minute_offset] = read_i64s::<4>(buf)?;
            Value::Date(Date {
                year,
                month,
                day,
                tz_minute_offset,
            })
        }
        DataType::Time => {
            let [hour, minute, second, tz_minute_offset] = read_i64s::<4>(buf)?;
            Value::Time(Time {
                hour,
                minute,
                second,
                tz_minute_offset,
            })
        }
        DataType::DateTime => {
            let [year, month, day, hour, minute, second, tz_minute_offset] =
                read_i64s::<7>(buf)?;
            Value::DateTime(DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                tz_minute_offset,
            })
        }
        DataType::Path => Value::Path(decode_path(buf, depth)?),
        DataType::List => {
            let len = read_len(buf)?;
            // Every element needs at least its tag byte.
            ensure(buf, len)?;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(buf, depth + 1)?);
            }
            Value::List(items)
        }
        DataType::Map => Value::Map(decode_map(buf, depth)?),
    };
    Ok(value)
}

fn decode_map(buf: &mut &[u8], depth: usize) -> DriverResult<BTreeMap<String, Value>> {
    let len = read_len(buf)?;
    let mut map = BTreeMap::new();
    for _ in 0..len {
        let key_tag = read_u8(buf)?;
        if key_tag != DataType::String.code() {
            return Err(DriverError::Decode(format!(
                "map keys must be strings, got tag 0x{:02x}",
                key_tag
            )));
        }
        let key = read_string(buf)?;
        let value = decode_value(buf, depth + 1)?;
        map.insert(key, value);
    }
    Ok(map)
}

fn decode_path(buf: &mut &[u8], depth: usize) -> DriverResult<GraphPath> {
    let len = read_len(buf)?;
    let start = decode_value(buf, depth + 1)?;
    if len == 0 {
        return Ok(GraphPath::single(start));
    }

    let mut segments = Vec::new();
    let mut from = start.clone();
    for _ in 0..len {
        let direction = read_string(buf)?;
        let direction = Direction::parse(&direction).ok_or_else(|| {
            DriverError::Decode(format!("unknown path direction '{}'", direction))
        })?;
        let kind = decode_value(buf, depth + 1)?;
        let to = decode_value(buf, depth + 1)?;
        segments.push(GraphPathSegment {
            from,
            to: to.clone(),
            kind,
            direction,
        });
        from = to;
    }
    Ok(GraphPath::from_segments(start, segments))
}
