//! Synchronous connection core
//!
//! Owns the outbound request writer, the inbound chunk decoder and the
//! response dispatcher. Inbound frames are decoded and dispatched to
//! completion inside [`Connection::receive`]; there is no I/O here.

use bytes::Bytes;

use super::dispatcher::{ResponseDispatcher, ResponseObserver};
use super::options::SessionConfig;
use super::stream::{SharedStream, StreamSlot};
use super::transport::Transport;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{
    ChunkDecoder, ChunkEncoder, MessageDecoder, Parameters, QueryPreamble, Request,
    RequestWriter, ResponseEnvelope,
};

pub struct Connection<T> {
    writer: RequestWriter<T>,
    chunks: ChunkDecoder,
    messages: MessageDecoder,
    dispatcher: ResponseDispatcher,
    failure: Option<DriverError>,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, config: &SessionConfig) -> Self {
        Self {
            writer: RequestWriter::new(ChunkEncoder::with_capacity(
                transport,
                config.buffer_size,
            )),
            chunks: ChunkDecoder::with_max_message_size(config.max_message_size),
            messages: MessageDecoder::new(),
            dispatcher: ResponseDispatcher::new(config.connection_error_policy),
            failure: None,
        }
    }

    /// Write a request and queue its observer.
    ///
    /// On a failed connection, or if the write fails, the observer is told
    /// immediately instead.
    pub fn submit(&mut self, request: Request, mut observer: Box<dyn ResponseObserver>) {
        if let Some(error) = &self.failure {
            observer.on_error(error.clone());
            return;
        }
        match self.writer.write(&request) {
            Ok(()) => self.dispatcher.add_observer(observer),
            Err(error) => {
                tracing::warn!("[CONNECTION] writing {:?} failed: {}", request.kind(), error);
                observer.on_error(error.clone());
                self.fail(error);
            }
        }
    }

    pub fn run(&mut self, query: String, parameters: Parameters, stream: SharedStream) {
        self.submit(
            Request::Run { query, parameters },
            Box::new(StreamSlot::run(stream)),
        );
    }

    /// Issue the DISCARD of a stream that was just cancelled.
    pub fn discard(&mut self, stream: SharedStream) {
        self.submit(Request::Discard, Box::new(StreamSlot::discard(stream)));
    }

    pub fn catalog(&mut self, observer: Box<dyn ResponseObserver>) {
        self.submit(Request::Catalog, observer);
    }

    pub fn cancel(&mut self, preamble: &QueryPreamble, observer: Box<dyn ResponseObserver>) {
        self.submit(
            Request::Cancel {
                worker_index: preamble.worker_index,
                token: preamble.cancellation_token.clone(),
            },
            observer,
        );
    }

    /// Feed one inbound transport delivery. Errors are fatal and have
    /// already been reported through the dispatcher when this returns.
    pub fn receive(&mut self, frame: Bytes) -> DriverResult<()> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if let Err(error) = self.process(frame) {
            tracing::warn!("[CONNECTION] fatal: {}", error);
            self.fail(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Mark the connection unusable and report `error` per the dispatcher's
    /// policy. Later submissions fail with the first error recorded.
    pub fn fail(&mut self, error: DriverError) {
        if self.failure.is_none() {
            self.failure = Some(error.clone());
        }
        self.writer.transport_mut().close();
        self.dispatcher.trigger_connection_error(error);
    }

    pub fn failure(&self) -> Option<&DriverError> {
        self.failure.as_ref()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Observers waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.len()
    }

    pub fn transport(&self) -> &T {
        self.writer.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.writer.transport_mut()
    }

    fn process(&mut self, frame: Bytes) -> DriverResult<()> {
        for message in self.chunks.decode(frame)? {
            if self.failure.is_some() {
                break;
            }
            let value = self.messages.decode(&message)?;
            let envelope = ResponseEnvelope::from_value(value)?;
            if let Some(follow_up) = self.dispatcher.handle(envelope)? {
                self.submit(follow_up.request, follow_up.observer);
            }
        }
        Ok(())
    }
}
