//! Client channel configuration
//!
//! [`ClientChannelOptions`] is the loose, caller-facing input (every field is
//! optional so that missing values can be reported with their specific error).
//! [`ClientChannelConfig::resolve`] validates it against the peer directory and
//! produces the immutable configuration the channel owns for its lifetime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::NoiseKeyPair;
use crate::directory::{PeerDescriptor, PeerDirectory};
use crate::engine::EngineKind;
use crate::errors::ConfigError;
use crate::types::PeerId;

/// Default number of reconnect attempts before a peer is marked failed
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default delay before the first reconnect attempt
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
/// Default growth factor between reconnect attempts
pub const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
/// Default ceiling on the reconnect delay
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
/// Default bound on opening a TCP connection and completing the handshake
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

// ----------------------------------------------------------------------------
// Construction Options
// ----------------------------------------------------------------------------

/// Caller-supplied options for building a client channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientChannelOptions {
    /// Hex-encoded X25519 private key of this validation miner
    pub local_private_key: Option<String>,
    /// Identifiers of the peers to connect to
    pub peers: Option<Vec<String>>,
    /// `noise-stream` (default) or `noise-peer`
    pub engine_kind: Option<String>,
    /// Handshake pattern for the `noise-peer` engine (`XX`, `IK`, `XK`)
    pub peer_handshake_pattern: Option<String>,
    pub retry_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_multiplier: Option<f64>,
    pub retry_max_delay_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
}

impl ClientChannelOptions {
    pub fn new<K, I, S>(local_private_key: K, peers: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local_private_key: Some(local_private_key.into()),
            peers: Some(peers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn with_engine_kind<S: Into<String>>(mut self, kind: S) -> Self {
        self.engine_kind = Some(kind.into());
        self
    }

    pub fn with_peer_handshake_pattern<S: Into<String>>(mut self, pattern: S) -> Self {
        self.peer_handshake_pattern = Some(pattern.into());
        self
    }

    pub fn with_retry(mut self, attempts: u32, base_delay_ms: u64) -> Self {
        self.retry_attempts = Some(attempts);
        self.retry_base_delay_ms = Some(base_delay_ms);
        self
    }

    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = Some(timeout_ms);
        self
    }

    /// True when no field at all was supplied
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ----------------------------------------------------------------------------
// Retry Policy
// ----------------------------------------------------------------------------

/// Bounded reconnect schedule: attempt `n` (0-based) waits
/// `min(base_delay * multiplier^n, max_delay)`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            multiplier: DEFAULT_RETRY_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis().max(self.base_delay.as_millis()) as f64;
        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = (base_ms * factor).min(max_ms);
        Duration::from_millis(delay_ms as u64)
    }
}

// ----------------------------------------------------------------------------
// Resolved Configuration
// ----------------------------------------------------------------------------

/// Validated configuration owned by a client channel
#[derive(Debug, Clone)]
pub struct ClientChannelConfig {
    pub local_key: NoiseKeyPair,
    pub peers: Vec<PeerDescriptor>,
    pub engine_kind: EngineKind,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
}

impl ClientChannelConfig {
    /// Validate options and resolve every peer identifier through the directory.
    ///
    /// Checks run in a fixed order so each failure has one stable message:
    /// missing options, missing key, missing peers, unknown peer, malformed key.
    pub fn resolve(options: Option<&ClientChannelOptions>, directory: &PeerDirectory) -> Result<Self, ConfigError> {
        let options = match options {
            Some(options) if !options.is_empty() => options.clone(),
            _ => return Err(ConfigError::MissingOptions),
        };

        let private_key = options
            .local_private_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingPrivateKey)?;

        let requested = options
            .peers
            .as_ref()
            .filter(|peers| !peers.is_empty())
            .ok_or(ConfigError::MissingPeers)?;

        let mut peers: Vec<PeerDescriptor> = Vec::with_capacity(requested.len());
        for identifier in requested {
            let peer_id = PeerId::from(identifier.as_str());
            let descriptor = directory.lookup(&peer_id)?;
            if peers.iter().any(|p| p.identifier == peer_id) {
                tracing::warn!(peer = %peer_id, "Ignoring duplicate peer in options");
                continue;
            }
            peers.push(descriptor);
        }

        let local_key = NoiseKeyPair::from_hex(private_key)?;

        let engine_kind = EngineKind::from_names(
            options.engine_kind.as_deref(),
            options.peer_handshake_pattern.as_deref(),
        );

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            attempts: options.retry_attempts.unwrap_or(defaults.attempts),
            base_delay: options
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            multiplier: options.retry_multiplier.unwrap_or(defaults.multiplier),
            max_delay: options
                .retry_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        };

        let connect_timeout =
            Duration::from_millis(options.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS));

        Ok(Self {
            local_key,
            peers,
            engine_kind,
            retry,
            connect_timeout,
        })
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.iter().map(|p| &p.identifier)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
