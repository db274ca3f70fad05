//! Native driver: sessions, query streams and response correlation
//!
//! Layering, bottom up:
//! - [`transport`]: outbound frame buffering until the socket is open
//! - [`dispatcher`]: strict FIFO matching of replies to requests
//! - [`stream`]: per-query lifecycle with pull-based flow control
//! - [`connection`]: the synchronous core tying codecs and dispatcher together
//! - [`session`] / [`client`]: the async facade on top of tokio-tungstenite

mod builder;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod observers;
pub mod options;
pub mod record;
mod result;
pub mod session;
pub mod stream;
pub mod transport;

pub use builder::{normalize_url, DriverBuilder};
pub use client::Driver;
pub use connection::Connection;
pub use dispatcher::{ConnectionErrorPolicy, FollowUp, ResponseDispatcher, ResponseObserver};
pub use options::SessionConfig;
pub use record::{Record, RecordKey, Variables};
pub use result::QueryResult;
pub use session::Session;
pub use stream::{
    Outcome, QueryStream, RecordDelivery, ResultObserver, SharedStream, SlotKind, StreamSlot,
    StreamState,
};
pub use transport::{BufferedTransport, Transport};
