//! Miner Channel Core
//!
//! Foundational pieces of the validation-miner client channel: peer identity and
//! directory types, the validated channel configuration, Noise key material and
//! handshake helpers, wire framing, and the pluggable secure-channel engines that
//! wrap a raw byte stream into an encrypted message pipe.
//!
//! The orchestration layer (connectors, supervisors, the client channel itself)
//! lives in `miner-channel-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod crypto;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod framing;
pub mod handshake;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ClientChannelConfig, ClientChannelOptions, RetryPolicy};
pub use crypto::{key_fingerprint, CipherChoice, LinkCipher, NoiseHandshake, NoiseKeyPair, NoiseSuite};
pub use directory::{MinerRecord, PeerDescriptor, PeerDirectory};
pub use engine::{
    EngineContext, EngineKind, HandshakePattern, LinkEvent, LinkEventReceiver, LinkEventSender,
    PeerCipherEngine, RawStream, RawTransport, SecureChannelEngine, StreamCipherEngine,
    TransportGuard,
};
pub use errors::{ChannelError, ConfigError, EngineError, Result, TransportError};
pub use types::{inbound_channel, ConnectionState, InboundMessage, InboundReceiver, InboundSender, PeerId};
