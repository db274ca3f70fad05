use url::Url;

use super::client::Driver;
use super::dispatcher::ConnectionErrorPolicy;
use super::options::SessionConfig;
use super::stream::RecordDelivery;
use crate::error::{DriverError, DriverResult};

pub struct DriverBuilder {
    url: String,
    config: SessionConfig,
}

impl DriverBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            config: SessionConfig::default(),
        }
    }

    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.config.fetch_size = fetch_size;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    pub fn max_message_size(mut self, max_message_size: usize) -> Self {
        self.config.max_message_size = max_message_size;
        self
    }

    pub fn record_delivery(mut self, delivery: RecordDelivery) -> Self {
        self.config.record_delivery = delivery;
        self
    }

    pub fn connection_error_policy(mut self, policy: ConnectionErrorPolicy) -> Self {
        self.config.connection_error_policy = policy;
        self
    }

    /// Replace every session setting at once.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DriverResult<Driver> {
        let url = normalize_url(&self.url)?;
        self.config.validate()?;
        Ok(Driver::from_parts(url, self.config))
    }
}

/// Accept `ws`/`wss`, and map `http`/`https` onto them.
pub fn normalize_url(raw: &str) -> DriverResult<Url> {
    let mut url = Url::parse(raw)?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(DriverError::InvalidConfig(format!(
                "unsupported url scheme '{}', expected ws or wss",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| DriverError::InvalidConfig(format!("cannot use {} as a {} url", raw, scheme)))?;
    Ok(url)
}
