//! Common test utilities for driver tests
//!
//! Provides shared helpers for:
//! - Building server responses as chunked frames
//! - Capturing and decoding the requests a connection writes
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use graphwire::driver::Transport;
use graphwire::error::DriverResult;
use graphwire::protocol::encoder::encode_value;
use graphwire::protocol::{ChunkDecoder, RequestType, ResponseEnvelope, ResponseType, Value};
use parking_lot::Mutex;

/// In-memory transport recording every flushed frame.
#[derive(Clone, Default)]
pub struct Wire {
    frames: Arc<Mutex<Vec<Bytes>>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Reassembled request messages, in write order.
    pub fn messages(&self) -> Vec<Bytes> {
        let mut decoder = ChunkDecoder::new();
        let mut messages = Vec::new();
        for frame in self.frames() {
            messages.extend(decoder.decode(frame).expect("well-formed outbound chunks"));
        }
        messages
    }

    /// The type byte of every request written so far.
    pub fn kinds(&self) -> Vec<RequestType> {
        self.messages()
            .iter()
            .map(|m| RequestType::try_from(m[0]).expect("known request type"))
            .collect()
    }

    /// Counts carried by the PULL requests written so far.
    pub fn pull_counts(&self) -> Vec<u32> {
        self.messages()
            .iter()
            .filter(|m| m[0] == RequestType::Pull.code())
            .map(|m| u32::from_be_bytes([m[2], m[3], m[4], m[5]]))
            .collect()
    }

    pub fn count(&self, kind: RequestType) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl Transport for Wire {
    fn send(&mut self, frame: Bytes) -> DriverResult<()> {
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Frame a message body as a single chunk followed by the seal.
pub fn chunked(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 4);
    for piece in body.chunks(u16::MAX as usize) {
        buf.put_u16(piece.len() as u16);
        buf.put_slice(piece);
    }
    buf.put_u16(0);
    buf.freeze()
}

/// One complete response, ready to hand to `Connection::receive`.
pub fn response(kind: ResponseType, payload: Value) -> Bytes {
    let envelope = ResponseEnvelope::new(kind, payload).into_value();
    let body = encode_value(&envelope).expect("encodable envelope");
    chunked(&body)
}

pub fn map(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub fn success(entries: Vec<(&str, Value)>) -> Bytes {
    response(ResponseType::Success, map(entries))
}

pub fn pull_success(has_next: bool) -> Bytes {
    success(vec![("hasNext", Value::Bool(has_next))])
}

pub fn error(message: &str) -> Bytes {
    response(ResponseType::Error, map(vec![("message", Value::from(message))]))
}

pub fn variables(names: &[&str]) -> Bytes {
    response(
        ResponseType::Variables,
        Value::List(names.iter().map(|n| Value::from(*n)).collect()),
    )
}

pub fn record(values: Vec<Value>) -> Bytes {
    response(ResponseType::Record, Value::List(values))
}

pub fn query_data(worker_index: u32, token: &str) -> Bytes {
    response(
        ResponseType::QueryData,
        map(vec![
            ("workerIndex", Value::UInt32(worker_index)),
            ("cancellationToken", Value::from(token)),
        ]),
    )
}
