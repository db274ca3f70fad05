//! Typed values carried by the protocol
//!
//! [`Value`] is a closed union over every data type the server can send or
//! accept. Domain objects (nodes, edges, IRIs, annotated strings, temporal
//! values and paths) get dedicated structs so callers can match on them
//! without re-parsing strings.

use std::collections::BTreeMap;

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Timelike};
use serde::Serialize;

use super::DataType;

/// Query parameters sent along with a RUN request.
pub type Parameters = BTreeMap<String, Value>;

/// A value decoded from (or encoded to) the wire.
///
/// 64-bit integers keep their exact width. Decimals are carried as their
/// canonical string form and never converted to floating point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int64(i64),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    StringLang(StringLang),
    StringDatatype(StringDatatype),
    Iri(Iri),
    NamedNode(GraphNode),
    Edge(GraphEdge),
    Anon(GraphAnon),
    Date(Date),
    Time(Time),
    DateTime(DateTime),
    Path(GraphPath),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// The tag this value is written with.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Bool(false) => DataType::BoolFalse,
            Value::Bool(true) => DataType::BoolTrue,
            Value::UInt8(_) => DataType::UInt8,
            Value::UInt16(_) => DataType::UInt16,
            Value::UInt32(_) => DataType::UInt32,
            Value::UInt64(_) => DataType::UInt64,
            Value::Int64(_) => DataType::Int64,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::Decimal(_) => DataType::Decimal,
            Value::String(_) => DataType::String,
            Value::StringLang(_) => DataType::StringLang,
            Value::StringDatatype(_) => DataType::StringDatatype,
            Value::Iri(_) => DataType::Iri,
            Value::NamedNode(_) => DataType::NamedNode,
            Value::Edge(_) => DataType::Edge,
            Value::Anon(_) => DataType::Anon,
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::DateTime(_) => DataType::DateTime,
            Value::Path(_) => DataType::Path,
            Value::List(_) => DataType::List,
            Value::Map(_) => DataType::Map,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer variant that fits in a `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt8(n) => Some(n.into()),
            Value::UInt16(n) => Some(n.into()),
            Value::UInt32(n) => Some(n.into()),
            Value::UInt64(n) => Some(n),
            Value::Int64(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    /// Any integer variant that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::UInt8(n) => Some(n.into()),
            Value::UInt16(n) => Some(n.into()),
            Value::UInt32(n) => Some(n.into()),
            Value::UInt64(n) => i64::try_from(n).ok(),
            Value::Int64(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f.into()),
            Value::Double(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Map lookup; `None` for missing keys and for non-map values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )+
    };
}

value_from! {
    bool => Bool,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i64 => Int64,
    f32 => Float,
    f64 => Double,
    String => String,
    Decimal => Decimal,
    StringLang => StringLang,
    StringDatatype => StringDatatype,
    Iri => Iri,
    GraphNode => NamedNode,
    GraphEdge => Edge,
    GraphAnon => Anon,
    Date => Date,
    Time => Time,
    DateTime => DateTime,
    GraphPath => Path,
    Vec<Value> => List,
    BTreeMap<String, Value> => Map,
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Arbitrary-precision decimal in its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Decimal(pub String);

impl Decimal {
    pub fn new(repr: impl Into<String>) -> Self {
        Self(repr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A named node of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "node")]
pub struct GraphNode {
    pub id: String,
}

impl GraphNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// An edge of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "edge")]
pub struct GraphEdge {
    pub id: String,
}

impl GraphEdge {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// An anonymous (blank) node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "anon")]
pub struct GraphAnon {
    pub id: String,
}

impl GraphAnon {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "iri")]
pub struct Iri {
    pub iri: String,
}

impl Iri {
    pub fn new(iri: impl Into<String>) -> Self {
        Self { iri: iri.into() }
    }
}

/// A literal annotated with a language tag, e.g. `"chat"@fr`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "langString")]
pub struct StringLang {
    pub value: String,
    pub lang: String,
}

impl StringLang {
    pub fn new(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            lang: lang.into(),
        }
    }
}

/// A literal annotated with a datatype IRI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "typedString")]
pub struct StringDatatype {
    pub value: String,
    pub datatype: String,
}

impl StringDatatype {
    pub fn new(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            datatype: datatype.into(),
        }
    }

    pub fn datatype_iri(&self) -> Iri {
        Iri::new(self.datatype.clone())
    }
}

/// Calendar date with a timezone offset in minutes (0 is UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "date")]
pub struct Date {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub tz_minute_offset: i64,
}

impl Date {
    pub fn new(year: i64, month: i64, day: i64) -> Self {
        Self {
            year,
            month,
            day,
            tz_minute_offset: 0,
        }
    }

    pub fn with_tz_minute_offset(mut self, minutes: i64) -> Self {
        self.tz_minute_offset = minutes;
        self
    }

    /// `None` when the fields do not form a valid calendar date.
    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        naive_date(self.year, self.month, self.day)
    }
}

impl From<NaiveDate> for Date {
    fn from(date: NaiveDate) -> Self {
        Date::new(date.year().into(), date.month().into(), date.day().into())
    }
}

/// Time of day with a timezone offset in minutes (0 is UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "time")]
pub struct Time {
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub tz_minute_offset: i64,
}

impl Time {
    pub fn new(hour: i64, minute: i64, second: i64) -> Self {
        Self {
            hour,
            minute,
            second,
            tz_minute_offset: 0,
        }
    }

    pub fn with_tz_minute_offset(mut self, minutes: i64) -> Self {
        self.tz_minute_offset = minutes;
        self
    }

    pub fn to_naive_time(&self) -> Option<NaiveTime> {
        naive_time(self.hour, self.minute, self.second)
    }
}

impl From<NaiveTime> for Time {
    fn from(time: NaiveTime) -> Self {
        Time::new(time.hour().into(), time.minute().into(), time.second().into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename = "dateTime")]
pub struct DateTime {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
    pub tz_minute_offset: i64,
}

impl DateTime {
    pub fn new(year: i64, month: i64, day: i64, hour: i64, minute: i64, second: i64) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            tz_minute_offset: 0,
        }
    }

    pub fn with_tz_minute_offset(mut self, minutes: i64) -> Self {
        self.tz_minute_offset = minutes;
        self
    }

    /// `None` when the fields or the offset are out of range.
    pub fn to_chrono(&self) -> Option<chrono::DateTime<FixedOffset>> {
        let date = naive_date(self.year, self.month, self.day)?;
        let time = naive_time(self.hour, self.minute, self.second)?;
        let seconds = i32::try_from(self.tz_minute_offset.checked_mul(60)?).ok()?;
        let offset = FixedOffset::east_opt(seconds)?;
        offset.from_local_datetime(&date.and_time(time)).single()
    }
}

impl<Tz: TimeZone> From<chrono::DateTime<Tz>> for DateTime {
    fn from(dt: chrono::DateTime<Tz>) -> Self {
        let offset_minutes = dt.offset().fix().local_minus_utc() / 60;
        let local = dt.naive_local();
        DateTime::new(
            local.year().into(),
            local.month().into(),
            local.day().into(),
            local.hour().into(),
            local.minute().into(),
            local.second().into(),
        )
        .with_tz_minute_offset(offset_minutes.into())
    }
}

fn naive_date(year: i64, month: i64, day: i64) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )
}

fn naive_time(hour: i64, minute: i64, second: i64) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(
        u32::try_from(hour).ok()?,
        u32::try_from(minute).ok()?,
        u32::try_from(second).ok()?,
    )
}

/// Orientation of a path segment relative to the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Undirected,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Undirected => "undirected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "undirected" => Some(Direction::Undirected),
            _ => None,
        }
    }
}

/// One hop of a path. `from` always equals the previous segment's `to`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphPathSegment {
    pub from: Value,
    pub to: Value,
    #[serde(rename = "type")]
    pub kind: Value,
    pub direction: Direction,
}

/// A directed path. A zero-length path starts and ends at the same node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "path")]
pub struct GraphPath {
    pub start: Box<Value>,
    pub end: Box<Value>,
    pub segments: Vec<GraphPathSegment>,
}

impl GraphPath {
    pub fn single(node: Value) -> Self {
        Self {
            start: Box::new(node.clone()),
            end: Box::new(node),
            segments: Vec::new(),
        }
    }

    /// Builds a path from its start node and segments; the end is the last `to`.
    pub fn from_segments(start: Value, segments: Vec<GraphPathSegment>) -> Self {
        let end = segments
            .last()
            .map(|segment| segment.to.clone())
            .unwrap_or_else(|| start.clone());
        Self {
            start: Box::new(start),
            end: Box::new(end),
            segments,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
