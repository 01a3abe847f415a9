//! Service configuration, loaded from TOML.
//!
//! Keys follow the dotted camelCase layout of the plugin's config file:
//!
//! ```toml
//! [forceLogin.timeout]
//! enabled = true
//! value = 1200
//! disableForPlayers = ["admin"]
//!
//! [automaticLogout]
//! enabled = false
//! inactivityTime = 6000
//!
//! [messages]
//! automaticallyLoggedOut = "You have been automatically logged out."
//! forcedLoginTimeout = "You took too long to log in."
//!
//! [storage.sessions]
//! filename = "sessions.db"
//!
//! [tick]
//! rateHz = 20
//! period = 1
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use gatehouse_session::SessionPolicy;
use gatehouse_tick::TickConfig;
use serde::{Deserialize, Serialize};

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatehouseConfig {
    /// `forceLogin`, `automaticLogout` and `messages` sections.
    #[serde(flatten)]
    pub policy: SessionPolicy,
    pub storage: StorageSettings,
    pub tick: TickSettings,
}

impl GatehouseConfig {
    /// Reads and parses the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Scheduler settings for the reconciler.
    pub fn tick_config(&self) -> TickConfig {
        TickConfig::new(self.tick.rate_hz, self.tick.period)
    }
}

/// `storage.*`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub sessions: SessionsFile,
}

/// `storage.sessions.*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsFile {
    /// Snapshot file name, relative to the data directory.
    pub filename: String,
}

impl Default for SessionsFile {
    fn default() -> Self {
        Self {
            filename: "sessions.db".to_string(),
        }
    }
}

/// `tick.*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TickSettings {
    /// Host ticks per second.
    pub rate_hz: u32,
    /// Host ticks between sweeps.
    pub period: u64,
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            rate_hz: 20,
            period: 1,
        }
    }
}
