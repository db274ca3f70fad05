use bytes::BytesMut;

use super::chunk::ChunkEncoder;
use super::encoder::ValueEncoder;
use super::{Parameters, RequestType, Value};
use crate::driver::transport::Transport;
use crate::error::DriverResult;

/// An outbound request, one logical message each.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Run { query: String, parameters: Parameters },
    Pull { count: u32 },
    Discard,
    Catalog,
    Cancel { worker_index: u32, token: String },
}

impl Request {
    pub fn run(query: impl Into<String>, parameters: Parameters) -> Self {
        Request::Run {
            query: query.into(),
            parameters,
        }
    }

    pub fn kind(&self) -> RequestType {
        match self {
            Request::Run { .. } => RequestType::Run,
            Request::Pull { .. } => RequestType::Pull,
            Request::Discard => RequestType::Discard,
            Request::Catalog => RequestType::Catalog,
            Request::Cancel { .. } => RequestType::Cancel,
        }
    }

    /// Encode the unchunked message body.
    pub fn encode(&self, buf: &mut BytesMut) -> DriverResult<()> {
        let mut enc = ValueEncoder::new(buf);
        enc.write_byte(self.kind().code());
        match self {
            Request::Run { query, parameters } => {
                enc.write_string(query)?;
                // Parameters go out as a regular MAP value.
                let map = Value::Map(parameters.clone());
                enc.write_value(&map)?;
            }
            Request::Pull { count } => enc.write_uint32(*count),
            Request::Discard | Request::Catalog => {}
            Request::Cancel {
                worker_index,
                token,
            } => {
                enc.write_uint32(*worker_index);
                enc.write_string(token)?;
            }
        }
        Ok(())
    }
}

/// Encodes requests and pushes them through the chunk encoder.
pub struct RequestWriter<T> {
    chunks: ChunkEncoder<T>,
    scratch: BytesMut,
}

impl<T: Transport> RequestWriter<T> {
    pub fn new(chunks: ChunkEncoder<T>) -> Self {
        Self {
            chunks,
            scratch: BytesMut::new(),
        }
    }

    /// Write, seal and flush one request.
    pub fn write(&mut self, request: &Request) -> DriverResult<()> {
        self.scratch.clear();
        request.encode(&mut self.scratch)?;
        tracing::trace!(
            "[REQUEST] {:?} ({} bytes)",
            request.kind(),
            self.scratch.len()
        );
        self.chunks.write(&self.scratch)?;
        self.chunks.seal()?;
        self.chunks.flush()
    }

    pub fn transport(&self) -> &T {
        self.chunks.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.chunks.transport_mut()
    }
}
