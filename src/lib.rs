//! Client driver for a remote graph database server
//!
//! Queries travel over a WebSocket as chunked binary messages. Results are
//! streamed back in batches pulled on demand, and every reply is matched to
//! its request in strict arrival order.
//!
//! ```no_run
//! # async fn demo() -> graphwire::DriverResult<()> {
//! let driver = graphwire::Driver::new("ws://localhost:1234")?;
//! let session = driver.session()?;
//! let result = session.run("MATCH (n) RETURN n LIMIT 10", Default::default())?;
//! for record in result.records().await? {
//!     println!("{:?}", record.get("n"));
//! }
//! driver.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;

pub use config::ClientConfig;
pub use driver::{
    ConnectionErrorPolicy, Driver, DriverBuilder, QueryResult, Record, RecordDelivery, Session,
    SessionConfig,
};
pub use error::{DriverError, DriverResult};
pub use protocol::{Parameters, Value};
