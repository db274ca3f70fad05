//! Value encoding, the structural inverse of [`MessageDecoder`](super::MessageDecoder)

use bytes::{BufMut, BytesMut};

use super::value::{GraphPath, StringDatatype, StringLang};
use super::{DataType, Value};
use crate::error::{DriverError, DriverResult};

/// Writes tagged values into a byte buffer.
pub struct ValueEncoder<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> ValueEncoder<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    /// Write a raw byte with no tag (request types).
    pub fn write_byte(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    pub fn write_value(&mut self, value: &Value) -> DriverResult<()> {
        self.write_tag(value.data_type());
        match value {
            Value::Null | Value::Bool(_) => {}
            Value::UInt8(n) => self.buf.put_u8(*n),
            Value::UInt16(n) => self.buf.put_u16(*n),
            Value::UInt32(n) => self.buf.put_u32(*n),
            Value::UInt64(n) => self.buf.put_u64(*n),
            Value::Int64(n) => self.buf.put_i64(*n),
            Value::Float(f) => self.buf.put_f32(*f),
            Value::Double(f) => self.buf.put_f64(*f),
            Value::Decimal(d) => self.put_string(d.as_str())?,
            Value::String(s) => self.put_string(s)?,
            Value::StringLang(StringLang { value, lang }) => {
                self.put_string(value)?;
                self.put_string(lang)?;
            }
            Value::StringDatatype(StringDatatype { value, datatype }) => {
                self.put_string(value)?;
                self.put_string(datatype)?;
            }
            Value::Iri(iri) => self.put_string(&iri.iri)?,
            Value::NamedNode(node) => self.put_string(&node.id)?,
            Value::Edge(edge) => self.put_string(&edge.id)?,
            Value::Anon(anon) => self.put_string(&anon.id)?,
            Value::Date(date) => {
                self.put_i64s(&[date.year, date.month, date.day, date.tz_minute_offset])
            }
            Value::Time(time) => {
                self.put_i64s(&[time.hour, time.minute, time.second, time.tz_minute_offset])
            }
            Value::DateTime(dt) => self.put_i64s(&[
                dt.year,
                dt.month,
                dt.day,
                dt.hour,
                dt.minute,
                dt.second,
                dt.tz_minute_offset,
            ]),
            Value::Path(path) => self.put_path(path)?,
            Value::List(items) => {
                self.put_len(items.len())?;
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Map(map) => {
                self.put_len(map.len())?;
                for (key, item) in map {
                    self.write_string(key)?;
                    self.write_value(item)?;
                }
            }
        }
        Ok(())
    }

    pub fn write_string(&mut self, s: &str) -> DriverResult<()> {
        self.write_tag(DataType::String);
        self.put_string(s)
    }

    pub fn write_uint32(&mut self, n: u32) {
        self.write_tag(DataType::UInt32);
        self.buf.put_u32(n);
    }

    fn write_tag(&mut self, tag: DataType) {
        self.buf.put_u8(tag.code());
    }

    fn put_len(&mut self, len: usize) -> DriverResult<()> {
        let len = u32::try_from(len).map_err(|_| {
            DriverError::Protocol(format!("length {} does not fit in a u32 prefix", len))
        })?;
        self.buf.put_u32(len);
        Ok(())
    }

    fn put_string(&mut self, s: &str) -> DriverResult<()> {
        self.put_len(s.len())?;
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    fn put_i64s(&mut self, fields: &[i64]) {
        for field in fields {
            self.buf.put_i64(*field);
        }
    }

    fn put_path(&mut self, path: &GraphPath) -> DriverResult<()> {
        self.put_len(path.segments.len())?;
        self.write_value(&path.start)?;
        for segment in &path.segments {
            self.put_string(segment.direction.as_str())?;
            self.write_value(&segment.kind)?;
            self.write_value(&segment.to)?;
        }
        Ok(())
    }
}

/// Encode a single value into a fresh buffer.
pub fn encode_value(value: &Value) -> DriverResult<BytesMut> {
    let mut buf = BytesMut::new();
    ValueEncoder::new(&mut buf).write_value(value)?;
    Ok(buf)
}
