//! Per-query stream lifecycle
//!
//! ```text
//!   AwaitingVariables --VARIABLES--> Streaming --SUCCESS{hasNext: false}--> Finished
//!                                      |   ^
//!                                      +---+ SUCCESS{hasNext: true}: PULL again
//! ```
//!
//! The stream is a plain state machine: it never writes to the connection
//! itself. Transitions that need a new request return it and the caller
//! issues it. Each request the stream issues gets its own [`StreamSlot`] on
//! the dispatcher so that run, pull and discard replies can be told apart.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::dispatcher::{FollowUp, ResponseObserver};
use super::record::{Record, Variables};
use crate::error::{DriverError, DriverResult};
use crate::protocol::response::has_next;
use crate::protocol::{QueryPreamble, Request, Value};

pub type SharedStream = Arc<Mutex<QueryStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingVariables,
    Streaming,
    Finished,
}

/// When records are pushed to subscribers instead of buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordDelivery {
    /// Push as soon as one subscriber wants records; buffer otherwise.
    #[default]
    WhenWanted,
    /// Push as soon as anyone is subscribed; subscribers that do not want
    /// records never see the ones delivered meanwhile.
    WhenSubscribed,
}

/// Terminal event of a stream. Set at most once.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(DriverError),
}

/// Consumer of stream events. Every method is optional.
///
/// Observers are invoked with the stream locked and must not call back into
/// the result they are subscribed to.
pub trait ResultObserver: Send {
    fn on_variables(&mut self, _variables: &[String]) {}

    fn on_record(&mut self, _record: &Record) {}

    fn on_success(&mut self, _summary: &Value) {}

    fn on_error(&mut self, _error: &DriverError) {}

    /// Whether buffered and live records should be handed to this observer.
    fn wants_records(&self) -> bool {
        false
    }

    /// Inactive observers are dropped before the next delivery.
    fn is_active(&self) -> bool {
        true
    }
}

pub struct QueryStream {
    fetch_size: u32,
    delivery: RecordDelivery,
    state: StreamState,
    cancelled: bool,
    abandoned: bool,
    variables: Option<Arc<Variables>>,
    preamble: Option<QueryPreamble>,
    pending_records: VecDeque<Record>,
    outcome: Option<Outcome>,
    subscribers: Vec<Box<dyn ResultObserver>>,
    pulls: usize,
}

impl QueryStream {
    pub fn new(fetch_size: u32, delivery: RecordDelivery) -> Self {
        Self {
            fetch_size,
            delivery,
            state: StreamState::AwaitingVariables,
            cancelled: false,
            abandoned: false,
            variables: None,
            preamble: None,
            pending_records: VecDeque::new(),
            outcome: None,
            subscribers: Vec::new(),
            pulls: 0,
        }
    }

    pub fn shared(self) -> SharedStream {
        Arc::new(Mutex::new(self))
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == StreamState::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn variables(&self) -> Option<&[String]> {
        self.variables.as_deref().map(Variables::names)
    }

    pub fn preamble(&self) -> Option<&QueryPreamble> {
        self.preamble.as_ref()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Records received but not yet handed to any subscriber.
    pub fn buffered(&self) -> usize {
        self.pending_records.len()
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.len()
    }

    /// PULL requests issued so far.
    pub fn pulls_issued(&self) -> usize {
        self.pulls
    }

    /// Replies to earlier requests are swallowed once the stream was
    /// cancelled or ended in error.
    pub fn absorbing(&self) -> bool {
        self.cancelled || matches!(self.outcome, Some(Outcome::Failure(_)))
    }

    pub fn on_query_data(&mut self, data: &Value) -> DriverResult<()> {
        if self.is_finished() && self.absorbing() {
            tracing::trace!("[STREAM] absorbed QUERY_DATA");
            return Ok(());
        }
        if self.state != StreamState::AwaitingVariables {
            return Err(self.out_of_state("QUERY_DATA"));
        }
        self.preamble = Some(QueryPreamble::from_payload(data)?);
        Ok(())
    }

    /// Records the variable list and asks for the first window of records.
    pub fn on_variables(&mut self, payload: &Value) -> DriverResult<Option<Request>> {
        if self.is_finished() && self.absorbing() {
            tracing::trace!("[STREAM] absorbed VARIABLES");
            return Ok(None);
        }
        if self.state != StreamState::AwaitingVariables {
            return Err(self.out_of_state("VARIABLES"));
        }

        let variables = Arc::new(Variables::from_payload(payload)?);
        for subscriber in &mut self.subscribers {
            subscriber.on_variables(variables.names());
        }
        self.variables = Some(variables);
        self.state = StreamState::Streaming;

        if self.cancelled {
            return Ok(None);
        }
        Ok(Some(self.pull()))
    }

    pub fn on_record(&mut self, payload: Value) -> DriverResult<()> {
        if self.cancelled || (self.is_finished() && self.absorbing()) {
            tracing::trace!("[STREAM] absorbed RECORD");
            return Ok(());
        }
        let variables = match (&self.state, &self.variables) {
            (StreamState::Streaming, Some(variables)) => variables.clone(),
            _ => return Err(self.out_of_state("RECORD")),
        };
        let values = match payload {
            Value::List(values) => values,
            other => {
                return Err(DriverError::Protocol(format!(
                    "record payload must be a list, got {:?}",
                    other.data_type()
                )))
            }
        };
        let record = Record::new(variables, values)?;

        self.subscribers.retain(|s| s.is_active());
        let push = match self.delivery {
            RecordDelivery::WhenWanted => self.subscribers.iter().any(|s| s.wants_records()),
            RecordDelivery::WhenSubscribed => !self.subscribers.is_empty(),
        };
        if push {
            for subscriber in self.subscribers.iter_mut().filter(|s| s.wants_records()) {
                subscriber.on_record(&record);
            }
        } else {
            self.pending_records.push_back(record);
        }
        Ok(())
    }

    /// SUCCESS of the RUN request.
    pub fn on_run_success(&mut self, summary: Value) -> DriverResult<Option<Request>> {
        if self.is_finished() && self.absorbing() {
            return Ok(None);
        }
        match self.state {
            StreamState::Streaming => Ok(None),
            // Older servers announce the variables in the run summary.
            StreamState::AwaitingVariables => match summary.get("projectionVariables") {
                Some(variables) => self.on_variables(variables),
                None if self.cancelled => Ok(None),
                None => Err(DriverError::Protocol(
                    "run succeeded before any variables were received".to_string(),
                )),
            },
            StreamState::Finished => Err(self.out_of_state("run SUCCESS")),
        }
    }

    /// SUCCESS of a PULL request: pull again or finish.
    pub fn on_pull_success(&mut self, summary: Value) -> DriverResult<Option<Request>> {
        if self.is_finished() && self.absorbing() {
            return Ok(None);
        }
        if self.state != StreamState::Streaming {
            return Err(self.out_of_state("pull SUCCESS"));
        }
        if self.cancelled {
            // The discard reply finishes the stream.
            return Ok(None);
        }
        if has_next(&summary) {
            return Ok(Some(self.pull()));
        }
        self.finish(Outcome::Success(summary));
        Ok(None)
    }

    /// SUCCESS of the DISCARD issued by [`cancel`](Self::cancel).
    pub fn on_discard_success(&mut self, summary: Value) -> DriverResult<()> {
        if self.is_finished() {
            if self.absorbing() {
                return Ok(());
            }
            return Err(self.out_of_state("discard SUCCESS"));
        }
        self.finish(Outcome::Success(summary));
        Ok(())
    }

    pub fn on_error(&mut self, error: DriverError) {
        if self.is_finished() {
            if self.absorbing() {
                tracing::trace!("[STREAM] absorbed error: {}", error);
            } else {
                tracing::warn!("[STREAM] error after the stream finished: {}", error);
            }
            return;
        }
        self.finish(Outcome::Failure(error));
    }

    /// Release the current subscribers without an event and ask for the rest
    /// of the results to be discarded. Returns whether a DISCARD must be
    /// issued.
    ///
    /// Observers subscribing afterwards hear the discard outcome.
    pub fn cancel(&mut self) -> bool {
        if self.is_finished() || self.cancelled {
            return false;
        }
        self.subscribers.clear();
        self.pending_records.clear();
        self.cancelled = true;
        true
    }

    /// Give up a request that never reached the server.
    pub fn revoke(&mut self, error: DriverError) {
        if !self.is_finished() {
            self.finish(Outcome::Failure(error));
        }
    }

    /// The connection is gone: drop every subscriber without telling it.
    pub fn abandon(&mut self) {
        self.abandoned = true;
        self.subscribers.clear();
    }

    /// Drop every subscriber without telling it. Records buffer again until
    /// someone subscribes.
    pub fn unsubscribe(&mut self) {
        self.subscribers.clear();
    }

    /// Replays what is already known, then registers the observer for the
    /// rest of the stream.
    pub fn subscribe(&mut self, mut observer: Box<dyn ResultObserver>) {
        if let Some(variables) = &self.variables {
            observer.on_variables(variables.names());
        }
        if observer.wants_records() {
            for record in self.pending_records.drain(..) {
                observer.on_record(&record);
            }
        }
        match &self.outcome {
            Some(Outcome::Success(summary)) => observer.on_success(summary),
            Some(Outcome::Failure(error)) => observer.on_error(error),
            None => {}
        }

        if self.is_finished() || self.abandoned {
            return;
        }
        self.subscribers.push(observer);
    }

    fn pull(&mut self) -> Request {
        self.pulls += 1;
        Request::Pull {
            count: self.fetch_size,
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        self.state = StreamState::Finished;
        for subscriber in &mut self.subscribers {
            match &outcome {
                Outcome::Success(summary) => subscriber.on_success(summary),
                Outcome::Failure(error) => subscriber.on_error(error),
            }
        }
        self.subscribers.clear();
        self.outcome = Some(outcome);
    }

    fn out_of_state(&self, event: &str) -> DriverError {
        DriverError::Protocol(format!("{} received while {:?}", event, self.state))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Run,
    Pull,
    Discard,
}

/// Dispatcher entry for one request issued on behalf of a stream.
pub struct StreamSlot {
    stream: SharedStream,
    kind: SlotKind,
}

impl StreamSlot {
    pub fn new(stream: SharedStream, kind: SlotKind) -> Self {
        Self { stream, kind }
    }

    pub fn run(stream: SharedStream) -> Self {
        Self::new(stream, SlotKind::Run)
    }

    pub fn discard(stream: SharedStream) -> Self {
        Self::new(stream, SlotKind::Discard)
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    fn follow(&self, request: Option<Request>) -> Option<FollowUp> {
        request.map(|request| FollowUp {
            request,
            observer: Box::new(StreamSlot::new(self.stream.clone(), SlotKind::Pull)),
        })
    }
}

impl ResponseObserver for StreamSlot {
    fn on_success(&mut self, summary: Value) -> DriverResult<Option<FollowUp>> {
        let request = {
            let mut stream = self.stream.lock();
            match self.kind {
                SlotKind::Run => stream.on_run_success(summary)?,
                SlotKind::Pull => stream.on_pull_success(summary)?,
                SlotKind::Discard => {
                    stream.on_discard_success(summary)?;
                    None
                }
            }
        };
        Ok(self.follow(request))
    }

    fn on_error(&mut self, error: DriverError) {
        self.stream.lock().on_error(error);
    }

    fn on_record(&mut self, values: Value) -> DriverResult<Option<FollowUp>> {
        let mut stream = self.stream.lock();
        if self.kind != SlotKind::Pull && !stream.absorbing() {
            return Err(self.unexpected("RECORD"));
        }
        stream.on_record(values)?;
        Ok(None)
    }

    fn on_variables(&mut self, variables: Value) -> DriverResult<Option<FollowUp>> {
        if self.kind != SlotKind::Run {
            return Err(self.unexpected("VARIABLES"));
        }
        let request = self.stream.lock().on_variables(&variables)?;
        Ok(self.follow(request))
    }

    fn on_query_data(&mut self, data: Value) -> DriverResult<Option<FollowUp>> {
        if self.kind != SlotKind::Run {
            return Err(self.unexpected("QUERY_DATA"));
        }
        self.stream.lock().on_query_data(&data)?;
        Ok(None)
    }

    fn describe(&self) -> &'static str {
        match self.kind {
            SlotKind::Run => "query run",
            SlotKind::Pull => "query pull",
            SlotKind::Discard => "query discard",
        }
    }
}
