use thiserror::Error;

/// Every failure the driver can surface.
///
/// Framing, decode and protocol errors are fatal to the connection that
/// produced them. `Server` errors are scoped to the one request that caused
/// them. Usage errors (`SessionClosed`, `DriverClosed`, `InvalidConfig`,
/// `QueryNotStarted`, `ResultConsumed`) are returned synchronously at the
/// call site. `Cancelled` and `Unsubscribed` are what a result handle reports
/// to a waiter released without an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Message too large: {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Session is closed")]
    SessionClosed,

    #[error("Driver is closed")]
    DriverClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Query has not been executed yet")]
    QueryNotStarted,

    #[error("Query was cancelled")]
    Cancelled,

    #[error("Result observer was unsubscribed")]
    Unsubscribed,

    #[error("Records were already consumed by a record stream")]
    ResultConsumed,
}

pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    /// Whether the error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DriverError::Framing(_)
                | DriverError::MessageTooLarge { .. }
                | DriverError::Decode(_)
                | DriverError::Protocol(_)
                | DriverError::Connection(_)
                | DriverError::ConnectionClosed
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DriverError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        DriverError::Connection(err.to_string())
    }
}

impl From<url::ParseError> for DriverError {
    fn from(err: url::ParseError) -> Self {
        DriverError::InvalidConfig(format!("invalid url: {}", err))
    }
}
