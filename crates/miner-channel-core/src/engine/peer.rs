//! `noise-peer` engine: selectable handshake pattern over ChaCha20-Poly1305 / BLAKE2b

use std::sync::Arc;

use async_trait::async_trait;

use super::link::NoiseLink;
use super::{EngineContext, HandshakePattern, LinkEventSender, SecureChannelEngine, TransportGuard};
use crate::crypto::{CipherChoice, NoiseSuite};
use crate::types::{InboundSender, PeerId};
use crate::Result;

/// Peer-to-peer secure stream speaking `Noise_<pattern>_25519_ChaChaPoly_BLAKE2b`
pub struct PeerCipherEngine {
    link: NoiseLink,
}

impl PeerCipherEngine {
    pub fn new(context: EngineContext, pattern: HandshakePattern) -> Self {
        Self {
            link: NoiseLink::new(context, Self::suite(pattern)),
        }
    }

    pub fn suite(pattern: HandshakePattern) -> NoiseSuite {
        NoiseSuite::new(pattern, CipherChoice::ChaChaPolyBlake2b)
    }
}

#[async_trait]
impl SecureChannelEngine for PeerCipherEngine {
    fn kind(&self) -> &'static str {
        "noise-peer"
    }

    fn peer_id(&self) -> &PeerId {
        self.link.peer_id()
    }

    fn generation(&self) -> u64 {
        self.link.generation()
    }

    async fn create_initiator_channel(
        &mut self,
        inbound: InboundSender,
        events: LinkEventSender,
    ) -> Result<TransportGuard> {
        self.link.open(inbound, events).await
    }

    fn send_frame(&self, payload: Arc<[u8]>) -> Result<()> {
        self.link.send_frame(payload)
    }

    fn close(&mut self) {
        self.link.close();
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }

    fn dropped_frames(&self) -> u64 {
        self.link.dropped_frames()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::super::link::testing;
    use super::*;
    use crate::crypto::NoiseKeyPair;
    use crate::framing::MAX_PAYLOAD;
    use crate::types::inbound_channel;
    use crate::{ChannelError, EngineError};

    #[tokio::test]
    async fn test_every_pattern_echoes() {
        for pattern in [HandshakePattern::Xx, HandshakePattern::Ik, HandshakePattern::Xk] {
            let server_key = NoiseKeyPair::generate();
            let (client_io, server_io) = tokio::io::duplex(64 * 1024);
            let server = tokio::spawn(testing::echo(
                server_io,
                PeerCipherEngine::suite(pattern),
                server_key.clone(),
                1,
            ));

            let mut engine = PeerCipherEngine::new(testing::context(&server_key, client_io, 1), pattern);
            let (inbound_tx, mut inbound_rx) = inbound_channel();
            let (events_tx, _events_rx) = mpsc::unbounded_channel();
            let _guard = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap();

            engine.send(&json!({"pattern": pattern.as_str()})).unwrap();
            let echoed = inbound_rx.recv().await.unwrap();
            assert_eq!(echoed.data, json!({"pattern": pattern.as_str()}));
            assert_eq!(engine.kind(), "noise-peer");

            server.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, _server_io) = tokio::io::duplex(1024);
        let engine = PeerCipherEngine::new(testing::context(&server_key, client_io, 1), HandshakePattern::Xx);

        let err = engine.send(&json!("early")).unwrap_err();
        assert!(matches!(err, ChannelError::Engine(EngineError::ChannelNotOpen { .. })));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(testing::echo(
            server_io,
            PeerCipherEngine::suite(HandshakePattern::Xx),
            server_key.clone(),
            0,
        ));

        let mut engine = PeerCipherEngine::new(testing::context(&server_key, client_io, 1), HandshakePattern::Xx);
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let _guard = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap();

        let payload: Arc<[u8]> = vec![b'x'; MAX_PAYLOAD + 1].into();
        let err = engine.send_frame(payload).unwrap_err();
        assert!(matches!(err, ChannelError::Engine(EngineError::PayloadTooLarge { .. })));
        assert!(engine.is_open());
        let _stream = server.await.unwrap();
    }
}
