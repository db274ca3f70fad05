//! Channel-backed observers bridging the reactor to async callers

use futures::channel::mpsc as stream_channel;
use tokio::sync::oneshot;

use super::dispatcher::{FollowUp, ResponseObserver};
use super::record::Record;
use super::stream::ResultObserver;
use crate::error::{DriverError, DriverResult};
use crate::protocol::Value;

/// Single-reply request (catalog, cancel) resolved through a oneshot.
pub struct ReplyObserver {
    label: &'static str,
    reply: Option<oneshot::Sender<DriverResult<Value>>>,
}

impl ReplyObserver {
    pub fn new(label: &'static str) -> (Self, oneshot::Receiver<DriverResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                label,
                reply: Some(tx),
            },
            rx,
        )
    }

    pub fn with_sender(label: &'static str, reply: oneshot::Sender<DriverResult<Value>>) -> Self {
        Self {
            label,
            reply: Some(reply),
        }
    }

    fn resolve(&mut self, result: DriverResult<Value>) {
        if let Some(reply) = self.reply.take() {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }
}

impl ResponseObserver for ReplyObserver {
    fn on_success(&mut self, summary: Value) -> DriverResult<Option<FollowUp>> {
        self.resolve(Ok(summary));
        Ok(None)
    }

    fn on_error(&mut self, error: DriverError) {
        self.resolve(Err(error));
    }

    fn describe(&self) -> &'static str {
        self.label
    }
}

/// Resolves once with the variable list.
pub struct VariablesWaiter(Option<oneshot::Sender<DriverResult<Vec<String>>>>);

impl VariablesWaiter {
    pub fn new() -> (Self, oneshot::Receiver<DriverResult<Vec<String>>>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }
}

impl ResultObserver for VariablesWaiter {
    fn on_variables(&mut self, variables: &[String]) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Ok(variables.to_vec()));
        }
    }

    fn on_error(&mut self, error: &DriverError) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn is_active(&self) -> bool {
        self.0.is_some()
    }
}

/// Resolves with the terminal summary or error.
pub struct SummaryWaiter(Option<oneshot::Sender<DriverResult<Value>>>);

impl SummaryWaiter {
    pub fn new() -> (Self, oneshot::Receiver<DriverResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }
}

impl ResultObserver for SummaryWaiter {
    fn on_success(&mut self, summary: &Value) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Ok(summary.clone()));
        }
    }

    fn on_error(&mut self, error: &DriverError) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn is_active(&self) -> bool {
        self.0.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Gathers every record and resolves with all of them at the end.
pub struct RecordCollector {
    records: Vec<Record>,
    reply: Option<oneshot::Sender<DriverResult<Vec<Record>>>>,
}

impl RecordCollector {
    pub fn new() -> (Self, oneshot::Receiver<DriverResult<Vec<Record>>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                records: Vec::new(),
                reply: Some(tx),
            },
            rx,
        )
    }
}

impl ResultObserver for RecordCollector {
    fn on_record(&mut self, record: &Record) {
        self.records.push(record.clone());
    }

    fn on_success(&mut self, _summary: &Value) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Ok(std::mem::take(&mut self.records)));
        }
    }

    fn on_error(&mut self, error: &DriverError) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error.clone()));
        }
    }

    fn wants_records(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.reply.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Feeds records into an unbounded channel consumed as a `Stream`.
///
/// The channel ends after the summary; an error is yielded as the last item.
pub struct RecordSender(Option<stream_channel::UnboundedSender<DriverResult<Record>>>);

impl RecordSender {
    pub fn new() -> (
        Self,
        stream_channel::UnboundedReceiver<DriverResult<Record>>,
    ) {
        let (tx, rx) = stream_channel::unbounded();
        (Self(Some(tx)), rx)
    }
}

impl ResultObserver for RecordSender {
    fn on_record(&mut self, record: &Record) {
        if let Some(tx) = &self.0 {
            let _ = tx.unbounded_send(Ok(record.clone()));
        }
    }

    fn on_success(&mut self, _summary: &Value) {
        self.0 = None;
    }

    fn on_error(&mut self, error: &DriverError) {
        if let Some(tx) = self.0.take() {
            let _ = tx.unbounded_send(Err(error.clone()));
        }
    }

    fn wants_records(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        self.0.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
