use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::Either;
use futures::stream::{self, Stream};
use tokio::sync::{oneshot, OnceCell};

use super::observers::{RecordCollector, RecordSender, SummaryWaiter, VariablesWaiter};
use super::record::Record;
use super::session::{Command, Session};
use super::stream::{ResultObserver, SharedStream, StreamState};
use crate::error::{DriverError, DriverResult};
use crate::protocol::{QueryPreamble, Value};

/// Handle to one running query.
///
/// Consumption is asynchronous; every accessor can be called at any time
/// and replays whatever already arrived. The handle keeps its session
/// connected.
///
/// Records are handed out once: either collected by [`records`](Self::records),
/// which caches them for later calls, or streamed by one
/// [`record_stream`](Self::record_stream).
#[derive(Clone)]
pub struct QueryResult {
    stream: SharedStream,
    session: Session,
    records: Arc<OnceCell<Vec<Record>>>,
    collecting: Arc<AtomicBool>,
    streaming: Arc<AtomicBool>,
}

impl QueryResult {
    pub(crate) fn new(stream: SharedStream, session: Session) -> Self {
        Self {
            stream,
            session,
            records: Arc::default(),
            collecting: Arc::default(),
            streaming: Arc::default(),
        }
    }

    /// Result variable names, once the server announced them.
    pub async fn variables(&self) -> DriverResult<Vec<String>> {
        let (waiter, rx) = VariablesWaiter::new();
        self.subscribe(waiter);
        self.wait(rx).await?
    }

    /// Every record, resolved when the query finishes.
    ///
    /// Later calls return the same records.
    pub async fn records(&self) -> DriverResult<Vec<Record>> {
        let records = self.records.get_or_try_init(|| self.collect()).await?;
        Ok(records.clone())
    }

    /// The final summary. For a cancelled query this is the discard summary.
    pub async fn summary(&self) -> DriverResult<Value> {
        let (waiter, rx) = SummaryWaiter::new();
        self.subscribe(waiter);
        self.wait(rx).await?
    }

    /// Records as they arrive. An error ends the stream as its last item.
    ///
    /// Once [`records`](Self::records) resolved, the cached records are
    /// replayed instead.
    pub fn record_stream(&self) -> impl Stream<Item = DriverResult<Record>> + Send + Unpin {
        if let Some(records) = self.records.get() {
            let replay: Vec<DriverResult<Record>> = records.iter().cloned().map(Ok).collect();
            return Either::Left(stream::iter(replay));
        }
        let refused = if self.is_cancelled() {
            Some(DriverError::Cancelled)
        } else if self.collecting.load(Ordering::SeqCst)
            || self.streaming.swap(true, Ordering::SeqCst)
        {
            Some(DriverError::ResultConsumed)
        } else {
            None
        };
        if let Some(error) = refused {
            return Either::Left(stream::iter(vec![Err(error)]));
        }

        let (sender, rx) = RecordSender::new();
        self.subscribe(sender);
        Either::Right(rx)
    }

    pub fn subscribe(&self, observer: impl ResultObserver + 'static) {
        self.stream.lock().subscribe(Box::new(observer));
    }

    /// Detach every observer. Pending waiters resolve with
    /// [`DriverError::Unsubscribed`]; records buffer until the next
    /// subscription.
    pub fn unsubscribe(&self) {
        self.stream.lock().unsubscribe();
    }

    /// Stop receiving records and discard the rest of the results.
    ///
    /// No-op once the query has finished.
    pub fn cancel(&self) -> DriverResult<()> {
        if self.stream.lock().is_finished() {
            return Ok(());
        }
        if !self.session.is_open() {
            return Err(DriverError::SessionClosed);
        }
        if !self.stream.lock().cancel() {
            return Ok(());
        }
        tracing::debug!("[RESULT] cancelled, discarding remaining records");
        if let Err(error) = self.session.send(Command::Discard(self.stream.clone())) {
            self.stream.lock().revoke(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Server-side identity of the query, known once it started executing.
    pub fn preamble(&self) -> Option<QueryPreamble> {
        self.stream.lock().preamble().cloned()
    }

    pub fn state(&self) -> StreamState {
        self.stream.lock().state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.stream.lock().is_cancelled()
    }

    async fn collect(&self) -> DriverResult<Vec<Record>> {
        if self.is_cancelled() {
            return Err(DriverError::Cancelled);
        }
        if self.streaming.load(Ordering::SeqCst) {
            return Err(DriverError::ResultConsumed);
        }
        self.collecting.store(true, Ordering::SeqCst);
        let (collector, rx) = RecordCollector::new();
        self.subscribe(collector);
        self.wait(rx).await?
    }

    /// A dropped sender means the observer was discarded without an event.
    async fn wait<T>(&self, rx: oneshot::Receiver<T>) -> DriverResult<T> {
        rx.await.map_err(|_| {
            let stream = self.stream.lock();
            if stream.is_cancelled() {
                DriverError::Cancelled
            } else if stream.is_abandoned() {
                DriverError::ConnectionClosed
            } else {
                DriverError::Unsubscribed
            }
        })
    }
}
