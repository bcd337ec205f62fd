//! Encrypted link shared by both engine variants
//!
//! Handshake as initiator, then one reader task (decrypt, parse, forward) and
//! one writer task (FIFO queue, encrypt, frame) per connection. Each direction
//! keeps its own nonce counter, so the two tasks never contend on the cipher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{EngineContext, LinkEvent, LinkEventSender, RawTransport, TransportGuard};
use crate::crypto::{key_fingerprint, LinkCipher, NoiseHandshake, NoiseKeyPair, NoiseSuite};
use crate::directory::PeerDescriptor;
use crate::framing::{read_frame, write_frame, MAX_PAYLOAD};
use crate::handshake::drive_handshake;
use crate::types::{InboundMessage, InboundSender, PeerId};
use crate::{ChannelError, ConfigError, EngineError, Result};

type OutboundSender = mpsc::UnboundedSender<Arc<[u8]>>;
type OutboundReceiver = mpsc::UnboundedReceiver<Arc<[u8]>>;

pub(crate) struct NoiseLink {
    peer: PeerDescriptor,
    suite: NoiseSuite,
    local_key: NoiseKeyPair,
    generation: u64,
    handshake_timeout: Duration,
    transport: Option<RawTransport>,
    outbound: Option<OutboundSender>,
    dropped: Arc<AtomicU64>,
}

impl NoiseLink {
    pub(crate) fn new(context: EngineContext, suite: NoiseSuite) -> Self {
        Self {
            peer: context.peer,
            suite,
            local_key: context.local_key,
            generation: context.generation,
            handshake_timeout: context.handshake_timeout,
            transport: Some(context.transport),
            outbound: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub(crate) fn peer_id(&self) -> &PeerId {
        &self.peer.identifier
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) async fn open(&mut self, inbound: InboundSender, events: LinkEventSender) -> Result<TransportGuard> {
        let peer_id = self.peer.identifier.clone();
        let mut transport = self
            .transport
            .take()
            .ok_or_else(|| ConfigError::ChannelAlreadyCreated {
                peer_id: peer_id.clone(),
            })?;

        let handshake = NoiseHandshake::initiator(&self.suite, &self.local_key, &self.peer.public_key)?;
        let established = match tokio::time::timeout(
            self.handshake_timeout,
            drive_handshake(&mut transport, handshake),
        )
        .await
        {
            Ok(Ok(established)) => established,
            Ok(Err(e)) => return Err(ChannelError::handshake_failed(&peer_id, e.to_string())),
            Err(_) => {
                return Err(ChannelError::Engine(EngineError::HandshakeTimeout {
                    peer_id,
                    duration_ms: self.handshake_timeout.as_millis() as u64,
                }))
            }
        };

        if established.remote_static != Some(self.peer.public_key) {
            warn!(
                peer = %peer_id,
                expected = %key_fingerprint(self.peer.public_key),
                "Remote static key does not match directory"
            );
            return Err(ChannelError::Engine(EngineError::RemoteKeyMismatch { peer_id }));
        }

        debug!(
            peer = %peer_id,
            generation = self.generation,
            protocol = %self.suite.protocol_name(),
            "Secure channel established"
        );

        let cipher = Arc::new(established.cipher);
        let (read_half, write_half) = tokio::io::split(transport);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(run_reader(
            read_half,
            cipher.clone(),
            peer_id.clone(),
            self.generation,
            inbound,
            events.clone(),
            self.dropped.clone(),
        ));
        let writer = tokio::spawn(run_writer(
            write_half,
            cipher,
            outbound_rx,
            peer_id,
            self.generation,
            events,
        ));

        self.outbound = Some(outbound_tx);
        Ok(TransportGuard::new(reader, writer))
    }

    pub(crate) fn send_frame(&self, payload: Arc<[u8]>) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(ChannelError::Engine(EngineError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            }));
        }

        let not_open = || {
            ChannelError::Engine(EngineError::ChannelNotOpen {
                peer_id: self.peer.identifier.clone(),
            })
        };
        let outbound = self.outbound.as_ref().ok_or_else(not_open)?;
        outbound.send(payload).map_err(|_| not_open())
    }

    pub(crate) fn close(&mut self) {
        if self.outbound.take().is_some() {
            debug!(peer = %self.peer.identifier, generation = self.generation, "Closing secure channel");
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.outbound.as_ref().map_or(false, |tx| !tx.is_closed())
    }

    pub(crate) fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ----------------------------------------------------------------------------
// Reader / Writer Tasks
// ----------------------------------------------------------------------------

async fn run_reader(
    mut reader: ReadHalf<RawTransport>,
    cipher: Arc<LinkCipher>,
    peer_id: PeerId,
    generation: u64,
    inbound: InboundSender,
    events: LinkEventSender,
    dropped: Arc<AtomicU64>,
) {
    let mut nonce = 0u64;
    let reason = loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break "stream ended".to_string(),
            Err(e) => break format!("read failed: {}", e),
        };

        let plaintext = match cipher.open(nonce, &frame) {
            Ok(plaintext) => plaintext,
            Err(e) => break format!("decrypt failed: {}", e),
        };
        nonce += 1;

        match serde_json::from_slice::<serde_json::Value>(&plaintext) {
            Ok(data) => {
                let message = InboundMessage {
                    from: peer_id.clone(),
                    data,
                };
                if inbound.send(message).is_err() {
                    trace!(peer = %peer_id, "Inbound receiver gone, discarding message");
                }
            }
            Err(e) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %peer_id, bytes = plaintext.len(), error = %e, "Dropping malformed inbound frame");
            }
        }
    };

    debug!(peer = %peer_id, generation, %reason, "Secure channel closed by remote");
    let _ = events.send(LinkEvent::Closed {
        peer_id,
        generation,
        reason,
    });
}

async fn run_writer(
    mut writer: WriteHalf<RawTransport>,
    cipher: Arc<LinkCipher>,
    mut outbound: OutboundReceiver,
    peer_id: PeerId,
    generation: u64,
    events: LinkEventSender,
) {
    let mut nonce = 0u64;
    while let Some(payload) = outbound.recv().await {
        let frame = match cipher.seal(nonce, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "Dropping outbound payload");
                continue;
            }
        };
        nonce += 1;

        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!(peer = %peer_id, generation, error = %e, "Write to peer failed");
            let _ = events.send(LinkEvent::Closed {
                peer_id,
                generation,
                reason: format!("write failed: {}", e),
            });
            return;
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!(peer = %peer_id, error = %e, "Shutdown of write half failed");
    }
}

// ----------------------------------------------------------------------------
// Test Support
// ----------------------------------------------------------------------------
