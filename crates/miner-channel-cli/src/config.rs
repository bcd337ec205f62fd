//! Miner Channel CLI Configuration
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - a TOML file (`--config`)
//! - environment variables prefixed `MINER_CHANNEL_`, with `__` separating
//!   sections (e.g. `MINER_CHANNEL_CLIENT__PRIVATE_KEY`)
//!
//! Command-line flags override the loaded values in the command handlers.

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use miner_channel_core::config::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
    DEFAULT_RETRY_MULTIPLIER,
};
use miner_channel_core::ClientChannelOptions;

use crate::error::{CliError, Result};

pub const ENV_PREFIX: &str = "MINER_CHANNEL_";

// ----------------------------------------------------------------------------
// Application Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Published peer directory (`miner-public-keys.json`)
    pub directory: PathBuf,

    pub client: ClientSection,

    pub keygen: KeygenSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            directory: PathBuf::from("config/miner-public-keys.json"),
            client: ClientSection::default(),
            keygen: KeygenSection::default(),
        }
    }
}

/// Client channel settings, mapped onto [`ClientChannelOptions`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Hex-encoded X25519 private key of this validation miner
    pub private_key: Option<String>,
    /// Miner key file to take the private key from when `private_key` is unset
    pub key_file: Option<PathBuf>,
    pub peers: Vec<String>,
    /// `noise-stream` or `noise-peer`
    pub engine: String,
    /// `XX`, `IK` or `XK` (noise-peer only)
    pub handshake_pattern: String,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            private_key: None,
            key_file: None,
            peers: Vec::new(),
            engine: "noise-stream".to_string(),
            handshake_pattern: "XX".to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl ClientSection {
    /// Options for `ClientChannel::new`. Missing values stay missing so the
    /// channel reports them with its usual messages.
    pub fn to_options(&self, private_key: Option<String>) -> ClientChannelOptions {
        ClientChannelOptions {
            local_private_key: private_key.or_else(|| self.private_key.clone()),
            peers: if self.peers.is_empty() {
                None
            } else {
                Some(self.peers.clone())
            },
            engine_kind: Some(self.engine.clone()),
            peer_handshake_pattern: Some(self.handshake_pattern.clone()),
            retry_attempts: Some(self.retry_attempts),
            retry_base_delay_ms: Some(self.retry_base_delay_ms),
            retry_multiplier: Some(self.retry_multiplier),
            retry_max_delay_ms: Some(self.retry_max_delay_ms),
            connect_timeout_ms: Some(self.connect_timeout_ms),
        }
    }
}

/// Test deployment layout produced by `keygen`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygenSection {
    pub output_dir: PathBuf,
    pub host: String,
    pub markets: u32,
    pub validation_miners_per_market: u32,
    pub storage_miners_per_market: u32,
    pub validation_start_port: u16,
    pub storage_start_port: u16,
}

impl Default for KeygenSection {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("config"),
            host: "localhost".to_string(),
            markets: 10,
            validation_miners_per_market: 10,
            storage_miners_per_market: 7,
            validation_start_port: 2020,
            storage_start_port: 4040,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Defaults, then the optional TOML file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(CliError::Config(format!("{} does not exist", path.display())));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: AppConfig = figment
            .extract()
            .map_err(|e| CliError::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, ignoring the environment
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| CliError::Config(format!("Failed to load from {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keygen.markets == 0 {
            return Err(CliError::Config("keygen.markets must be at least 1".to_string()));
        }
        Ok(())
    }
}
