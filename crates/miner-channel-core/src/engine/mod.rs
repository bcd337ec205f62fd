//! Secure-channel engines
//!
//! An engine takes an already-open raw byte stream to one peer, performs the
//! Noise handshake as initiator, and from then on:
//! - encrypts and writes outbound payloads in call order,
//! - decrypts, parses and forwards inbound frames tagged with the peer id,
//! - reports closure of the stream as a [`LinkEvent`].
//!
//! Two interchangeable variants exist, selected once by [`EngineKind`]:
//! [`StreamCipherEngine`] (`Noise_XX_25519_AESGCM_SHA256`) and
//! [`PeerCipherEngine`] (`Noise_<pattern>_25519_ChaChaPoly_BLAKE2b`).

mod link;
mod peer;
mod stream;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::crypto::{NoiseKeyPair, NoiseSuite};
use crate::directory::PeerDescriptor;
use crate::types::{InboundSender, PeerId};
use crate::Result;

pub use peer::PeerCipherEngine;
pub use stream::StreamCipherEngine;

// ----------------------------------------------------------------------------
// Raw Transport
// ----------------------------------------------------------------------------

/// Any bidirectional byte stream an engine can run over
pub trait RawStream: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

impl<T> RawStream for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static {}

pub type RawTransport = Box<dyn RawStream>;

/// Owns the reader and writer tasks of an open channel, which in turn own the
/// two halves of the raw transport. Releasing the guard stops both tasks and
/// closes the transport. Dropping it aborts them immediately.
#[derive(Debug)]
pub struct TransportGuard {
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// How long a released guard waits for the writer to flush before aborting it
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

impl TransportGuard {
    pub(crate) fn new(reader: JoinHandle<()>, writer: JoinHandle<()>) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
        }
    }

    /// Stop inbound delivery right away, give queued writes a short window to
    /// drain, then drop the transport.
    pub async fn release(mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

/// Lifecycle notifications an open channel sends to its supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The stream ended or failed; `generation` identifies which engine
    Closed {
        peer_id: PeerId,
        generation: u64,
        reason: String,
    },
}

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkEventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

// ----------------------------------------------------------------------------
// Engine Selection
// ----------------------------------------------------------------------------

/// Noise handshake pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakePattern {
    /// Mutual static keys transmitted during the handshake
    Xx,
    /// Responder static key known in advance, initiator key sent immediately
    Ik,
    /// Responder static key known in advance, initiator key sent last
    Xk,
}

impl HandshakePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakePattern::Xx => "XX",
            HandshakePattern::Ik => "IK",
            HandshakePattern::Xk => "XK",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "XX" => Some(HandshakePattern::Xx),
            "IK" => Some(HandshakePattern::Ik),
            "XK" => Some(HandshakePattern::Xk),
            _ => None,
        }
    }

    /// Whether the initiator must be given the responder's static key
    pub fn needs_remote_key(&self) -> bool {
        matches!(self, HandshakePattern::Ik | HandshakePattern::Xk)
    }
}

/// Which engine variant a channel builds for every peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    NoiseStream,
    NoisePeer { pattern: HandshakePattern },
}

impl Default for EngineKind {
    fn default() -> Self {
        EngineKind::NoiseStream
    }
}

impl EngineKind {
    pub const NOISE_STREAM: &'static str = "noise-stream";
    pub const NOISE_PEER: &'static str = "noise-peer";

    /// Resolve configuration names. Unknown engine names fall back to
    /// `noise-stream` and unknown patterns to `XX`, both with a warning.
    pub fn from_names(kind: Option<&str>, pattern: Option<&str>) -> Self {
        let pattern = match pattern {
            None => HandshakePattern::Xx,
            Some(name) => HandshakePattern::parse(name).unwrap_or_else(|| {
                tracing::warn!(pattern = name, "Unknown handshake pattern, using XX");
                HandshakePattern::Xx
            }),
        };

        match kind.map(str::trim) {
            None | Some("") | Some(Self::NOISE_STREAM) => EngineKind::NoiseStream,
            Some(Self::NOISE_PEER) => EngineKind::NoisePeer { pattern },
            Some(other) => {
                tracing::warn!(engine = other, "Unknown engine kind, using {}", Self::NOISE_STREAM);
                EngineKind::NoiseStream
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::NoiseStream => Self::NOISE_STREAM,
            EngineKind::NoisePeer { .. } => Self::NOISE_PEER,
        }
    }

    /// Noise suite spoken by this variant (and expected of the responder)
    pub fn suite(&self) -> NoiseSuite {
        match self {
            EngineKind::NoiseStream => StreamCipherEngine::suite(),
            EngineKind::NoisePeer { pattern } => PeerCipherEngine::suite(*pattern),
        }
    }

    /// Build the engine for one freshly opened transport
    pub fn build(&self, context: EngineContext) -> Box<dyn SecureChannelEngine> {
        match self {
            EngineKind::NoiseStream => Box::new(StreamCipherEngine::new(context)),
            EngineKind::NoisePeer { pattern } => Box::new(PeerCipherEngine::new(context, *pattern)),
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Interface
// ----------------------------------------------------------------------------

/// Everything an engine needs for one connection attempt
pub struct EngineContext {
    pub peer: PeerDescriptor,
    pub local_key: NoiseKeyPair,
    /// Distinguishes this engine's events from earlier engines for the same peer
    pub generation: u64,
    pub handshake_timeout: Duration,
    pub transport: RawTransport,
}

/// Encrypted message pipe to one peer
#[async_trait]
pub trait SecureChannelEngine: Send + Sync {
    /// Variant name, e.g. `noise-stream`
    fn kind(&self) -> &'static str;

    fn peer_id(&self) -> &PeerId;

    fn generation(&self) -> u64;

    /// Perform the handshake as initiator and start delivering inbound frames
    /// to `inbound`. Closure of the stream is reported on `events`. Fails with
    /// a configuration-class error if the channel was already created.
    async fn create_initiator_channel(
        &mut self,
        inbound: InboundSender,
        events: LinkEventSender,
    ) -> Result<TransportGuard>;

    /// Queue an already-serialized payload for encryption and delivery
    fn send_frame(&self, payload: Arc<[u8]>) -> Result<()>;

    /// Serialize `message` and queue it for delivery
    fn send(&self, message: &serde_json::Value) -> Result<()> {
        let payload: Arc<[u8]> = serde_json::to_vec(message)?.into();
        self.send_frame(payload)
    }

    /// End the write side of the channel after queued writes drain
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Inbound frames dropped because they were not valid JSON
    fn dropped_frames(&self) -> u64;
}
