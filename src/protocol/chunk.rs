//! Chunk framing
//!
//! ```text
//!   [chunk_size][      chunk     ]
//!   [ 2 bytes  ][chunk_size bytes]
//! ```
//!
//! A zero-sized chunk `[0x00 0x00]` seals the current logical message.

use bytes::{BufMut, Bytes, BytesMut};

use super::{BUFFER_SIZE, CHUNK_HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::driver::transport::Transport;
use crate::error::{DriverError, DriverResult};

/// Smallest staging buffer that can hold a header plus one body byte.
pub const MIN_BUFFER_SIZE: usize = CHUNK_HEADER_SIZE + 1;

/// Largest staging buffer whose chunk bodies still fit a `u16` length.
pub const MAX_BUFFER_SIZE: usize = CHUNK_HEADER_SIZE + u16::MAX as usize;

/// Packs outbound bytes into chunks staged in a bounded buffer.
///
/// A chunk stays open across `write` calls until it is closed by `seal`,
/// `flush` or the staging buffer running full.
pub struct ChunkEncoder<T> {
    transport: T,
    buf: BytesMut,
    capacity: usize,
    /// Offset of the open chunk's header, if any.
    open_chunk: Option<usize>,
}

impl<T: Transport> ChunkEncoder<T> {
    pub fn new(transport: T) -> Self {
        Self::with_capacity(transport, BUFFER_SIZE)
    }

    /// `capacity` is clamped to `[MIN_BUFFER_SIZE, MAX_BUFFER_SIZE]`.
    pub fn with_capacity(transport: T, capacity: usize) -> Self {
        let capacity = capacity.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE);
        Self {
            transport,
            buf: BytesMut::with_capacity(capacity),
            capacity,
            open_chunk: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn write(&mut self, mut data: &[u8]) -> DriverResult<()> {
        while !data.is_empty() {
            self.ensure_write_space()?;
            let n = data.len().min(self.remaining_space());
            self.buf.put_slice(&data[..n]);
            data = &data[n..];
            if !data.is_empty() {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Ends the current logical message. The seal is sent on the next flush.
    pub fn seal(&mut self) -> DriverResult<()> {
        self.close_chunk();
        if self.remaining_space() < CHUNK_HEADER_SIZE {
            self.flush()?;
        }
        self.buf.put_u16(0);
        Ok(())
    }

    /// Closes any open chunk and hands the staged bytes to the transport.
    pub fn flush(&mut self) -> DriverResult<()> {
        self.close_chunk();
        if self.buf.is_empty() {
            return Ok(());
        }
        let frame = self.buf.split().freeze();
        tracing::trace!("[CHUNK] flushing {} bytes", frame.len());
        self.transport.send(frame)
    }

    fn ensure_write_space(&mut self) -> DriverResult<()> {
        let needed = if self.open_chunk.is_some() {
            1
        } else {
            CHUNK_HEADER_SIZE + 1
        };
        if self.remaining_space() < needed {
            self.flush()?;
        }
        if self.open_chunk.is_none() {
            self.open_chunk = Some(self.buf.len());
            self.buf.put_u16(0);
        }
        Ok(())
    }

    fn close_chunk(&mut self) {
        if let Some(start) = self.open_chunk.take() {
            // capacity bounds the body to u16::MAX
            let size = (self.buf.len() - start - CHUNK_HEADER_SIZE) as u16;
            self.buf[start..start + CHUNK_HEADER_SIZE].copy_from_slice(&size.to_be_bytes());
        }
    }

    fn remaining_space(&self) -> usize {
        self.capacity - self.buf.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    ReadingHeaderByte0,
    ReadingHeaderByte1,
    ReadingBody,
}

/// Reassembles logical messages from arbitrarily fragmented chunk data.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: DecodeState,
    chunk_remaining: usize,
    slices: Vec<Bytes>,
    message_size: usize,
    max_message_size: usize,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            state: DecodeState::ReadingHeaderByte0,
            chunk_remaining: 0,
            slices: Vec::new(),
            message_size: 0,
            max_message_size,
        }
    }

    /// Feed one inbound delivery; returns every message sealed within it.
    ///
    /// Partial headers and bodies are carried over to the next call.
    pub fn decode(&mut self, mut input: Bytes) -> DriverResult<Vec<Bytes>> {
        let mut messages = Vec::new();
        while !input.is_empty() {
            match self.state {
                DecodeState::ReadingHeaderByte0 => {
                    if input.len() >= CHUNK_HEADER_SIZE {
                        self.chunk_remaining = u16::from_be_bytes([input[0], input[1]]) as usize;
                        input = input.slice(CHUNK_HEADER_SIZE..);
                        self.on_header(&mut messages);
                    } else {
                        self.chunk_remaining = (input[0] as usize) << 8;
                        input = input.slice(1..);
                        self.state = DecodeState::ReadingHeaderByte1;
                    }
                }
                DecodeState::ReadingHeaderByte1 => {
                    self.chunk_remaining |= input[0] as usize;
                    input = input.slice(1..);
                    self.on_header(&mut messages);
                }
                DecodeState::ReadingBody => {
                    let n = self.chunk_remaining.min(input.len());
                    self.message_size += n;
                    if self.message_size > self.max_message_size {
                        let size = self.message_size;
                        self.reset();
                        return Err(DriverError::MessageTooLarge {
                            size,
                            max: self.max_message_size,
                        });
                    }
                    self.slices.push(input.split_to(n));
                    self.chunk_remaining -= n;
                    if self.chunk_remaining == 0 {
                        self.state = DecodeState::ReadingHeaderByte0;
                    }
                }
            }
        }
        Ok(messages)
    }

    /// True when no partial message is buffered.
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::ReadingHeaderByte0 && self.slices.is_empty()
    }

    fn on_header(&mut self, messages: &mut Vec<Bytes>) {
        if self.chunk_remaining == 0 {
            messages.push(self.join_slices());
            self.state = DecodeState::ReadingHeaderByte0;
        } else {
            self.state = DecodeState::ReadingBody;
        }
    }

    fn join_slices(&mut self) -> Bytes {
        self.message_size = 0;
        if self.slices.len() == 1 {
            return self.slices.pop().unwrap_or_default();
        }
        let total = self.slices.iter().map(Bytes::len).sum();
        let mut joined = BytesMut::with_capacity(total);
        for slice in self.slices.drain(..) {
            joined.put(slice);
        }
        joined.freeze()
    }

    fn reset(&mut self) {
        self.state = DecodeState::ReadingHeaderByte0;
        self.chunk_remaining = 0;
        self.slices.clear();
        self.message_size = 0;
    }
}
