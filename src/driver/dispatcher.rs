//! Response correlation
//!
//! Replies carry no request identifiers: the server answers requests in the
//! order they were issued, so the dispatcher keeps the observers in that same
//! order. Exactly one observer is current at a time. SUCCESS and ERROR retire
//! it; RECORD, VARIABLES and QUERY_DATA do not.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};
use crate::protocol::response::error_message;
use crate::protocol::{Request, ResponseEnvelope, ResponseType, Value};

/// A request an observer wants issued as a consequence of an event.
pub struct FollowUp {
    pub request: Request,
    pub observer: Box<dyn ResponseObserver>,
}

/// Receives the events belonging to one request.
///
/// Events a request kind never produces default to a protocol error.
pub trait ResponseObserver: Send {
    fn on_success(&mut self, summary: Value) -> DriverResult<Option<FollowUp>>;

    fn on_error(&mut self, error: DriverError);

    fn on_record(&mut self, _values: Value) -> DriverResult<Option<FollowUp>> {
        Err(self.unexpected("RECORD"))
    }

    fn on_variables(&mut self, _variables: Value) -> DriverResult<Option<FollowUp>> {
        Err(self.unexpected("VARIABLES"))
    }

    fn on_query_data(&mut self, _data: Value) -> DriverResult<Option<FollowUp>> {
        Err(self.unexpected("QUERY_DATA"))
    }

    /// Short name used in logs and errors.
    fn describe(&self) -> &'static str;

    fn unexpected(&self, event: &str) -> DriverError {
        DriverError::Protocol(format!("{} received an unexpected {}", self.describe(), event))
    }
}

/// Who hears about a transport failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorPolicy {
    /// Only the current observer; queued observers are dropped.
    #[default]
    NotifyCurrent,
    /// The current observer and every queued observer.
    NotifyAll,
}

pub struct ResponseDispatcher {
    current: Option<Box<dyn ResponseObserver>>,
    pending: VecDeque<Box<dyn ResponseObserver>>,
    policy: ConnectionErrorPolicy,
}

impl Default for ResponseDispatcher {
    fn default() -> Self {
        Self::new(ConnectionErrorPolicy::default())
    }
}

impl ResponseDispatcher {
    pub fn new(policy: ConnectionErrorPolicy) -> Self {
        Self {
            current: None,
            pending: VecDeque::new(),
            policy,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn ResponseObserver>) {
        if self.current.is_none() {
            self.current = Some(observer);
        } else {
            self.pending.push_back(observer);
        }
    }

    /// Route one envelope. An error return is fatal to the connection.
    pub fn handle(&mut self, envelope: ResponseEnvelope) -> DriverResult<Option<FollowUp>> {
        let ResponseEnvelope { kind, payload } = envelope;

        let Some(mut observer) = self.current.take() else {
            tracing::warn!("[DISPATCH] {:?} with no observer waiting, ignored", kind);
            return Ok(None);
        };
        tracing::trace!("[DISPATCH] {:?} -> {}", kind, observer.describe());

        let result = match kind {
            ResponseType::Success => observer.on_success(payload),
            ResponseType::Error => {
                observer.on_error(DriverError::Server(error_message(&payload)));
                Ok(None)
            }
            ResponseType::Record => observer.on_record(payload),
            ResponseType::Variables => observer.on_variables(payload),
            ResponseType::QueryData => observer.on_query_data(payload),
        };

        // A handler that failed stays current so the connection error that
        // follows reaches it first.
        let retired = matches!(kind, ResponseType::Success | ResponseType::Error);
        if retired && result.is_ok() {
            self.current = self.pending.pop_front();
        } else {
            self.current = Some(observer);
        }
        result
    }

    /// Fail the current observer (and, per policy, the queued ones) and
    /// forget all of them.
    pub fn trigger_connection_error(&mut self, error: DriverError) {
        if let Some(mut current) = self.current.take() {
            current.on_error(error.clone());
        }
        let dropped = self.pending.len();
        for mut observer in self.pending.drain(..) {
            if self.policy == ConnectionErrorPolicy::NotifyAll {
                observer.on_error(error.clone());
            }
        }
        if dropped > 0 {
            tracing::debug!(
                "[DISPATCH] connection error with {} queued observers ({:?})",
                dropped,
                self.policy
            );
        }
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Observers waiting, the current one included.
    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}
