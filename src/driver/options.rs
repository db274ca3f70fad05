use serde::{Deserialize, Serialize};

use super::dispatcher::ConnectionErrorPolicy;
use super::stream::RecordDelivery;
use crate::error::{DriverError, DriverResult};
use crate::protocol::chunk::{MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::protocol::{BUFFER_SIZE, DEFAULT_FETCH_SIZE, MAX_MESSAGE_SIZE};

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Records requested per PULL.
    pub fetch_size: u32,
    /// Outbound staging buffer, chunk headers included.
    pub buffer_size: usize,
    /// Largest reassembled inbound message accepted.
    pub max_message_size: usize,
    pub record_delivery: RecordDelivery,
    pub connection_error_policy: ConnectionErrorPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
            buffer_size: BUFFER_SIZE,
            max_message_size: MAX_MESSAGE_SIZE,
            record_delivery: RecordDelivery::default(),
            connection_error_policy: ConnectionErrorPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> DriverResult<()> {
        if self.fetch_size == 0 {
            return Err(DriverError::InvalidConfig(
                "fetch_size must be positive".to_string(),
            ));
        }
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.buffer_size) {
            return Err(DriverError::InvalidConfig(format!(
                "buffer_size must be between {} and {}, got {}",
                MIN_BUFFER_SIZE, MAX_BUFFER_SIZE, self.buffer_size
            )));
        }
        if self.max_message_size == 0 {
            return Err(DriverError::InvalidConfig(
                "max_message_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
