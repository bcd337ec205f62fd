//! Error types for the miner client channel
//!
//! Configuration errors carry stable, caller-visible messages: callers and test
//! suites match on the exact text, so the wording of [`ConfigError`] must not
//! drift. Transport and engine errors describe per-peer failures that the
//! runtime normally absorbs rather than surfaces.

use core::time::Duration;

use crate::types::PeerId;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Construction-time configuration failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("options parameter is required to create the client channel.")]
    MissingOptions,

    #[error("options parameter should contain the private key for this client.")]
    MissingPrivateKey,

    #[error("options parameter should list one or more servers to connect this client channel to.")]
    MissingPeers,

    #[error("Server {peer_id} is not one of the available peers to connect to.")]
    UnknownPeer { peer_id: PeerId },

    #[error("options parameter contains an invalid private key: {reason}")]
    InvalidPrivateKey { reason: String },

    #[error("Invalid peer directory entry for {peer_id}: {reason}")]
    InvalidDirectoryEntry { peer_id: PeerId, reason: String },

    #[error("Failed to load peer directory: {reason}")]
    DirectoryUnavailable { reason: String },

    /// The engine's raw transport was already consumed by an earlier call
    #[error("Initiator channel already created for peer {peer_id}")]
    ChannelAlreadyCreated { peer_id: PeerId },
}

/// Failures opening the raw byte stream to a peer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed to peer {peer_id}: {reason}")]
    ConnectionFailed { peer_id: PeerId, reason: String },

    #[error("Connection to peer {peer_id} timed out after {duration_ms}ms")]
    Timeout { peer_id: PeerId, duration_ms: u64 },
}

/// Failures inside a secure-channel engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Handshake with peer {peer_id} failed: {reason}")]
    HandshakeFailed { peer_id: PeerId, reason: String },

    #[error("Handshake with peer {peer_id} timed out after {duration_ms}ms")]
    HandshakeTimeout { peer_id: PeerId, duration_ms: u64 },

    #[error("Peer {peer_id} presented a static key that does not match the directory")]
    RemoteKeyMismatch { peer_id: PeerId },

    #[error("Secure channel to peer {peer_id} is not open")]
    ChannelNotOpen { peer_id: PeerId },

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

// ----------------------------------------------------------------------------
// Channel Error
// ----------------------------------------------------------------------------

/// Umbrella error for the client channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Noise protocol error: {0}")]
    Noise(#[from] snow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Misuse of the channel lifecycle (initialize twice, use after close)
    #[error("Invalid channel lifecycle: {reason}")]
    Lifecycle { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl TransportError {
    /// Create a connection failed error
    pub fn connection_failed<R: Into<String>>(peer_id: &PeerId, reason: R) -> Self {
        TransportError::ConnectionFailed {
            peer_id: peer_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a connect timeout error
    pub fn timeout(peer_id: &PeerId, after: Duration) -> Self {
        TransportError::Timeout {
            peer_id: peer_id.clone(),
            duration_ms: after.as_millis() as u64,
        }
    }
}

impl ChannelError {
    /// Create a handshake failed error
    pub fn handshake_failed<R: Into<String>>(peer_id: &PeerId, reason: R) -> Self {
        ChannelError::Engine(EngineError::HandshakeFailed {
            peer_id: peer_id.clone(),
            reason: reason.into(),
        })
    }

    /// Create a lifecycle error with a reason
    pub fn lifecycle<T: Into<String>>(reason: T) -> Self {
        ChannelError::Lifecycle {
            reason: reason.into(),
        }
    }

    /// Whether this error describes a single unreachable or misbehaving peer
    pub fn is_peer_failure(&self) -> bool {
        matches!(
            self,
            ChannelError::Transport(_) | ChannelError::Engine(_) | ChannelError::Noise(_) | ChannelError::Io(_)
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ChannelError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
