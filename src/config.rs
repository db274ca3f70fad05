//! Client configuration
//!
//! Settings come from an optional `graphwire.toml`, then from the
//! environment. A `.env` file next to the config file is loaded first.
//!
//! ## Environment Variables
//!
//! - `GRAPHWIRE_URL` - Server WebSocket URL
//! - `GRAPHWIRE_FETCH_SIZE` - Records requested per pull
//! - `GRAPHWIRE_BUFFER_SIZE` - Outbound chunk buffer size in bytes
//! - `GRAPHWIRE_MAX_MESSAGE_SIZE` - Largest inbound message accepted, in bytes

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::driver::{Driver, DriverBuilder, SessionConfig};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "graphwire.toml";

/// Environment variable names
pub const ENV_URL: &str = "GRAPHWIRE_URL";
pub const ENV_FETCH_SIZE: &str = "GRAPHWIRE_FETCH_SIZE";
pub const ENV_BUFFER_SIZE: &str = "GRAPHWIRE_BUFFER_SIZE";
pub const ENV_MAX_MESSAGE_SIZE: &str = "GRAPHWIRE_MAX_MESSAGE_SIZE";

pub const DEFAULT_URL: &str = "ws://localhost:1234";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server URL (`ws`, `wss`, `http` or `https`)
    #[serde(default = "default_url")]
    pub url: String,
    /// Per-session protocol settings
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_url() -> String {
    DEFAULT_URL.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a directory
    ///
    /// Loads `dir/.env` if present, reads `dir/graphwire.toml` if present and
    /// applies environment variable overrides.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let env_path = dir.join(".env");
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {}", env_path.display()))?;
        }

        let config_path = dir.join(CONFIG_FILE_NAME);
        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// [`load`](Self::load)). Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = var(ENV_URL) {
            self.url = url;
        }
        if let Some(v) = var(ENV_FETCH_SIZE) {
            self.session.fetch_size = v
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_FETCH_SIZE))?;
        }
        if let Some(v) = var(ENV_BUFFER_SIZE) {
            self.session.buffer_size = v
                .parse()
                .with_context(|| format!("{} must be an integer", ENV_BUFFER_SIZE))?;
        }
        if let Some(v) = var(ENV_MAX_MESSAGE_SIZE) {
            self.session.max_message_size = v
                .parse()
                .with_context(|| format!("{} must be an integer", ENV_MAX_MESSAGE_SIZE))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        crate::driver::normalize_url(&self.url)?;
        self.session.validate()?;
        Ok(())
    }

    pub fn driver_builder(&self) -> DriverBuilder {
        DriverBuilder::new(&self.url).config(self.session.clone())
    }

    pub fn build_driver(&self) -> anyhow::Result<Driver> {
        Ok(self.driver_builder().build()?)
    }

    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE_NAME), content)?;
        Ok(())
    }
}
