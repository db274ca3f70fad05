//! Outbound side of the connection
//!
//! Frames produced before the WebSocket handshake completes are held back and
//! released in order once the socket is open.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{DriverError, DriverResult};

/// Destination for flushed chunk frames.
pub trait Transport {
    fn send(&mut self, frame: Bytes) -> DriverResult<()>;

    /// Refuse further frames.
    fn close(&mut self) {}
}

enum State {
    Connecting(Vec<Bytes>),
    Open(mpsc::UnboundedSender<Bytes>),
    Closed,
}

/// Transport that buffers until connected, then forwards frames to the
/// socket writer task.
pub struct BufferedTransport {
    state: State,
}

impl Default for BufferedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self {
            state: State::Connecting(Vec::new()),
        }
    }

    /// Switch to the open state, releasing every frame buffered so far.
    pub fn on_open(&mut self, tx: mpsc::UnboundedSender<Bytes>) -> DriverResult<()> {
        let pending = match std::mem::replace(&mut self.state, State::Closed) {
            State::Connecting(pending) => pending,
            State::Open(_) => {
                return Err(DriverError::Connection(
                    "transport is already open".to_string(),
                ))
            }
            State::Closed => return Err(DriverError::ConnectionClosed),
        };

        tracing::debug!("[TRANSPORT] open, releasing {} buffered frames", pending.len());
        for frame in pending {
            tx.send(frame).map_err(|_| DriverError::ConnectionClosed)?;
        }
        self.state = State::Open(tx);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Number of frames waiting for the handshake.
    pub fn pending(&self) -> usize {
        match &self.state {
            State::Connecting(pending) => pending.len(),
            _ => 0,
        }
    }
}

impl Transport for BufferedTransport {
    fn send(&mut self, frame: Bytes) -> DriverResult<()> {
        match &mut self.state {
            State::Connecting(pending) => {
                pending.push(frame);
                Ok(())
            }
            State::Open(tx) => tx.send(frame).map_err(|_| DriverError::ConnectionClosed),
            State::Closed => Err(DriverError::ConnectionClosed),
        }
    }

    fn close(&mut self) {
        self.state = State::Closed;
    }
}
