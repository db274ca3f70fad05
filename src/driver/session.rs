//! Session: one WebSocket connection driven by a reactor task
//!
//! The reactor is the only owner of the socket and of the [`Connection`]
//! core. Public methods talk to it over a command channel; results come back
//! through oneshot channels or through the shared per-query stream state.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

use super::connection::Connection;
use super::observers::ReplyObserver;
use super::options::SessionConfig;
use super::result::QueryResult;
use super::stream::{QueryStream, SharedStream};
use super::transport::BufferedTransport;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{Parameters, QueryPreamble, Value};

pub(crate) enum Command {
    Run {
        query: String,
        parameters: Parameters,
        stream: SharedStream,
    },
    Discard(SharedStream),
    Catalog(oneshot::Sender<DriverResult<Value>>),
    Cancel {
        preamble: QueryPreamble,
        reply: oneshot::Sender<DriverResult<Value>>,
    },
    Close(oneshot::Sender<()>),
}

pub(crate) struct SessionInner {
    id: u64,
    config: SessionConfig,
    commands: mpsc::UnboundedSender<Command>,
    open: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let (done, _) = oneshot::channel();
            let _ = self.commands.send(Command::Close(done));
        }
    }
}

/// A connection to the server. Cloning shares the connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start connecting. Requests issued before the handshake completes are
    /// buffered and sent once the socket is open.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(id: u64, url: Url, config: SessionConfig) -> DriverResult<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DriverError::Connection(format!("sessions need a tokio runtime: {}", e))
        })?;

        let (commands, rx) = mpsc::unbounded_channel();
        runtime.spawn(reactor(id, url, config.clone(), rx));

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                config,
                commands,
                open: AtomicBool::new(true),
            }),
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Issue a query. Records are pulled `fetch_size` at a time.
    pub fn run(&self, query: &str, parameters: Parameters) -> DriverResult<QueryResult> {
        self.ensure_open()?;
        let config = &self.inner.config;
        let stream = QueryStream::new(config.fetch_size, config.record_delivery).shared();
        self.send(Command::Run {
            query: query.to_string(),
            parameters,
            stream: stream.clone(),
        })?;
        Ok(QueryResult::new(stream, self.clone()))
    }

    /// The server catalog summary.
    pub async fn catalog(&self) -> DriverResult<Value> {
        self.ensure_open()?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Catalog(reply))?;
        rx.await.map_err(|_| DriverError::ConnectionClosed)?
    }

    /// Ask the server to stop executing `result`'s query.
    ///
    /// The request queues behind everything already issued on this session;
    /// [`Driver::cancel`](super::Driver::cancel) uses a fresh connection.
    pub async fn cancel(&self, result: &QueryResult) -> DriverResult<()> {
        self.ensure_open()?;
        let preamble = result.preamble().ok_or(DriverError::QueryNotStarted)?;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { preamble, reply })?;
        rx.await.map_err(|_| DriverError::ConnectionClosed)??;
        Ok(())
    }

    /// Close the connection. Unfinished results stop receiving events.
    pub async fn close(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let (done, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Close(done)).is_ok() {
            let _ = rx.await;
        }
        tracing::debug!("[SESSION {}] closed", self.inner.id);
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::SessionClosed)
        }
    }

    pub(crate) fn send(&self, command: Command) -> DriverResult<()> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| DriverError::SessionClosed)
    }
}

type Core = Connection<BufferedTransport>;

struct Reactor {
    id: u64,
    conn: Core,
    streams: Vec<Weak<Mutex<QueryStream>>>,
}

impl Reactor {
    fn apply(&mut self, command: Command) -> ControlFlow<Option<oneshot::Sender<()>>> {
        match command {
            Command::Run {
                query,
                parameters,
                stream,
            } => {
                tracing::debug!("[SESSION {}] run: {}", self.id, query);
                self.streams.retain(|s| s.strong_count() > 0);
                self.streams.push(Arc::downgrade(&stream));
                self.conn.run(query, parameters, stream);
            }
            Command::Discard(stream) => self.conn.discard(stream),
            Command::Catalog(reply) => self
                .conn
                .catalog(Box::new(ReplyObserver::with_sender("catalog", reply))),
            Command::Cancel { preamble, reply } => self.conn.cancel(
                &preamble,
                Box::new(ReplyObserver::with_sender("cancel", reply)),
            ),
            Command::Close(done) => return ControlFlow::Break(Some(done)),
        }
        ControlFlow::Continue(())
    }

    /// The connection failed: results that were not told release their
    /// waiters.
    fn fail(&mut self, error: DriverError) {
        tracing::warn!("[SESSION {}] {}", self.id, error);
        self.conn.fail(error);
        self.abandon_streams();
    }

    fn abandon_streams(&mut self) {
        for stream in self.streams.drain(..).filter_map(|s| s.upgrade()) {
            stream.lock().abandon();
        }
    }

    fn shutdown(&mut self) {
        self.abandon_streams();
        self.conn.fail(DriverError::SessionClosed);
    }
}

async fn reactor(
    id: u64,
    url: Url,
    config: SessionConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut reactor = Reactor {
        id,
        conn: Connection::new(BufferedTransport::new(), &config),
        streams: Vec::new(),
    };

    tracing::debug!("[SESSION {}] connecting to {}", id, url);
    let handshake = connect_async(url.as_str());
    tokio::pin!(handshake);

    let ws = loop {
        tokio::select! {
            result = &mut handshake => match result {
                Ok((ws, _)) => break Some(ws),
                Err(e) => {
                    reactor.fail(DriverError::Connection(format!(
                        "Is the server running at {}? ({})",
                        url, e
                    )));
                    break None;
                }
            },
            command = commands.recv() => match command.map(|c| reactor.apply(c)) {
                Some(ControlFlow::Continue(())) => {}
                Some(ControlFlow::Break(done)) => return finish(&mut reactor, done),
                None => return finish(&mut reactor, None),
            },
        }
    };

    let Some(ws) = ws else {
        // Keep answering commands with the connection error until closed.
        while let Some(command) = commands.recv().await {
            if let ControlFlow::Break(done) = reactor.apply(command) {
                return finish(&mut reactor, done);
            }
        }
        return finish(&mut reactor, None);
    };

    tracing::debug!("[SESSION {}] connected", id);
    let (mut sink, mut source) = ws.split();
    let (frames, mut outbound) = mpsc::unbounded_channel::<Bytes>();
    if let Err(e) = reactor.conn.transport_mut().on_open(frames) {
        reactor.fail(e);
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = sink.send(Message::Binary(frame)).await {
                tracing::debug!("[SESSION {}] write failed: {}", id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut reading = true;
    let done = loop {
        tokio::select! {
            command = commands.recv() => match command.map(|c| reactor.apply(c)) {
                Some(ControlFlow::Continue(())) => {}
                Some(ControlFlow::Break(done)) => break done,
                None => break None,
            },
            message = source.next(), if reading => match message {
                Some(Ok(Message::Binary(data))) => {
                    if reactor.conn.receive(data).is_err() {
                        reactor.abandon_streams();
                        reading = false;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let error = match frame {
                        Some(frame) if frame.code == CloseCode::Normal => {
                            DriverError::ConnectionClosed
                        }
                        _ => DriverError::Connection(
                            "Connection was closed abnormally".to_string(),
                        ),
                    };
                    reactor.fail(error);
                    reading = false;
                }
                Some(Ok(Message::Text(_))) => {
                    reactor.fail(DriverError::Framing(
                        "text frame where binary chunks were expected".to_string(),
                    ));
                    reading = false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    reactor.fail(DriverError::Connection(format!(
                        "Connection was closed abnormally: {}",
                        e
                    )));
                    reading = false;
                }
                None => {
                    reactor.fail(DriverError::Connection(
                        "Connection was closed abnormally".to_string(),
                    ));
                    reading = false;
                }
            },
        }
    };

    // Closing the transport drops the frame sender; the writer drains what
    // is queued and closes the socket.
    reactor.shutdown();
    drop(reactor);
    let _ = writer.await;
    if let Some(done) = done {
        let _ = done.send(());
    }
}

fn finish(reactor: &mut Reactor, done: Option<oneshot::Sender<()>>) {
    reactor.shutdown();
    if let Some(done) = done {
        let _ = done.send(());
    }
}
