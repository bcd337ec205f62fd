//! `noise-stream` engine: fixed XX handshake over AES-GCM / SHA-256

use std::sync::Arc;

use async_trait::async_trait;

use super::link::NoiseLink;
use super::{EngineContext, HandshakePattern, LinkEventSender, SecureChannelEngine, TransportGuard};
use crate::crypto::{CipherChoice, NoiseSuite};
use crate::types::{InboundSender, PeerId};
use crate::Result;

/// Encrypted duplex stream speaking `Noise_XX_25519_AESGCM_SHA256`
pub struct StreamCipherEngine {
    link: NoiseLink,
}

impl StreamCipherEngine {
    pub fn new(context: EngineContext) -> Self {
        Self {
            link: NoiseLink::new(context, Self::suite()),
        }
    }

    pub fn suite() -> NoiseSuite {
        NoiseSuite::new(HandshakePattern::Xx, CipherChoice::AesGcmSha256)
    }
}

#[async_trait]
impl SecureChannelEngine for StreamCipherEngine {
    fn kind(&self) -> &'static str {
        "noise-stream"
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
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::super::link::testing;
    use super::super::LinkEvent;
    use super::*;
    use crate::crypto::NoiseKeyPair;
    use crate::framing::{read_frame, write_frame};
    use crate::types::inbound_channel;
    use crate::{ChannelError, ConfigError, EngineError};

    #[tokio::test]
    async fn test_messages_round_trip_through_echo() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(testing::echo(server_io, StreamCipherEngine::suite(), server_key.clone(), 2));

        let mut engine = StreamCipherEngine::new(testing::context(&server_key, client_io, 1));
        let (inbound_tx, mut inbound_rx) = inbound_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let _guard = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap();
        assert!(engine.is_open());

        engine.send(&json!({"seq": 1})).unwrap();
        engine.send(&json!(["two", 2])).unwrap();

        let first = inbound_rx.recv().await.unwrap();
        let second = inbound_rx.recv().await.unwrap();
        assert_eq!(first.from, PeerId::from("s0"));
        assert_eq!(first.data, json!({"seq": 1}));
        assert_eq!(second.data, json!(["two", 2]));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_second_creation_is_a_configuration_error() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(testing::echo(server_io, StreamCipherEngine::suite(), server_key.clone(), 0));

        let mut engine = StreamCipherEngine::new(testing::context(&server_key, client_io, 1));
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let _guard = engine
            .create_initiator_channel(inbound_tx.clone(), events_tx.clone())
            .await
            .unwrap();

        let err = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Configuration(ConfigError::ChannelAlreadyCreated { .. })
        ));
        let _stream = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_static_key_must_match_directory() {
        let server_key = NoiseKeyPair::generate();
        let impostor = NoiseKeyPair::generate();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let _server = tokio::spawn(testing::echo(server_io, StreamCipherEngine::suite(), impostor, 0));

        let mut engine = StreamCipherEngine::new(testing::context(&server_key, client_io, 1));
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let err = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap_err();
        assert!(matches!(err, ChannelError::Engine(EngineError::RemoteKeyMismatch { .. })));
        assert!(!engine.is_open());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);
        let suite = StreamCipherEngine::suite();
        let responder_key = server_key.clone();
        let server = tokio::spawn(async move {
            let cipher = testing::accept(&mut server_io, suite, &responder_key).await;
            write_frame(&mut server_io, &cipher.seal(0, b"{not json").unwrap()).await.unwrap();
            write_frame(&mut server_io, &cipher.seal(1, br#"{"ok":true}"#).unwrap())
                .await
                .unwrap();
            server_io
        });

        let mut engine = StreamCipherEngine::new(testing::context(&server_key, client_io, 1));
        let (inbound_tx, mut inbound_rx) = inbound_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let _guard = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap();

        let message = inbound_rx.recv().await.unwrap();
        assert_eq!(message.data, json!({"ok": true}));
        assert_eq!(engine.dropped_frames(), 1);
        let _stream = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_close_is_reported_with_generation() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(testing::echo(server_io, StreamCipherEngine::suite(), server_key.clone(), 0));

        let mut engine = StreamCipherEngine::new(testing::context(&server_key, client_io, 7));
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let _guard = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap();

        drop(server.await.unwrap());

        let event = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let LinkEvent::Closed { peer_id, generation, .. } = event;
        assert_eq!(peer_id, PeerId::from("s0"));
        assert_eq!(generation, 7);
    }

    #[tokio::test]
    async fn test_close_shuts_down_write_half() {
        let server_key = NoiseKeyPair::generate();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(testing::echo(server_io, StreamCipherEngine::suite(), server_key.clone(), 0));

        let mut engine = StreamCipherEngine::new(testing::context(&server_key, client_io, 1));
        let (inbound_tx, _inbound_rx) = inbound_channel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let _guard = engine.create_initiator_channel(inbound_tx, events_tx).await.unwrap();
        let mut server_io = server.await.unwrap();

        engine.close();
        assert!(!engine.is_open());
        assert!(engine.send(&json!("late")).is_err());
        assert!(read_frame(&mut server_io).await.unwrap().is_none());
    }
}
