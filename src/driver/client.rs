use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use url::Url;

use super::builder::{normalize_url, DriverBuilder};
use super::options::SessionConfig;
use super::result::QueryResult;
use super::session::{Session, SessionInner};
use crate::error::{DriverError, DriverResult};
use crate::protocol::Value;

/// Entry point: holds the server address and opens sessions.
///
/// An application is expected to keep a single driver around.
pub struct Driver {
    url: Url,
    config: SessionConfig,
    open: AtomicBool,
    next_session: AtomicU64,
    sessions: Mutex<Vec<Weak<SessionInner>>>,
}

impl Driver {
    pub fn new(url: &str) -> DriverResult<Self> {
        Ok(Self::from_parts(normalize_url(url)?, SessionConfig::default()))
    }

    pub fn builder(url: &str) -> DriverBuilder {
        DriverBuilder::new(url)
    }

    pub(crate) fn from_parts(url: Url, config: SessionConfig) -> Self {
        Self {
            url,
            config,
            open: AtomicBool::new(true),
            next_session: AtomicU64::new(1),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Open a new connection with the driver's settings.
    pub fn session(&self) -> DriverResult<Session> {
        self.session_with(self.config.clone())
    }

    pub fn session_with(&self, config: SessionConfig) -> DriverResult<Session> {
        self.ensure_open()?;
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Session::connect(id, self.url.clone(), config)?;

        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.strong_count() > 0);
        sessions.push(session.downgrade());
        Ok(session)
    }

    /// Fetch the catalog on a short-lived session.
    pub async fn catalog(&self) -> DriverResult<Value> {
        let session = self.session()?;
        let catalog = session.catalog().await;
        session.close().await;
        catalog
    }

    /// Cancel a query from another session, over a fresh connection so the
    /// request does not wait behind that session's pending replies.
    pub async fn cancel(&self, result: &QueryResult) -> DriverResult<()> {
        let session = self.session()?;
        let outcome = session.cancel(result).await;
        session.close().await;
        outcome
    }

    /// Close every session opened by this driver.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<Session> = self
            .sessions
            .lock()
            .drain(..)
            .filter_map(|s| s.upgrade())
            .map(Session::from_inner)
            .collect();
        tracing::debug!("[DRIVER] closing {} sessions", sessions.len());
        futures::future::join_all(sessions.iter().map(Session::close)).await;
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::DriverClosed)
        }
    }
}
