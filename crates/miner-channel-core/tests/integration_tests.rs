//! Integration tests for the miner channel core
//!
//! Drives the pieces together the way the runtime does: a published JSON
//! directory resolves into a channel configuration, the configured engine kind
//! builds an engine over an in-memory stream, and a hand-written responder on
//! the other end of the stream echoes every frame.

use std::time::Duration;

use miner_channel_core::framing::{read_frame, write_frame};
use miner_channel_core::handshake::drive_handshake;
use miner_channel_core::*;
use tokio::io::DuplexStream;
use tokio::time::timeout;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

fn published_directory(server: &NoiseKeyPair) -> String {
    let other = NoiseKeyPair::generate();
    format!(
        r#"{{
            "s0": {{ "serverAddress": "127.0.0.1", "serverPort": 4040, "publicKey": "{}", "identifier": "s0" }},
            "s1": {{ "serverAddress": "127.0.0.1", "serverPort": 4041, "publicKey": "{}", "identifier": "s1" }}
        }}"#,
        server.public_key_hex(),
        other.public_key_hex()
    )
}

/// Responder that completes the handshake and echoes `count` frames
async fn echo_responder(mut stream: DuplexStream, suite: NoiseSuite, key: NoiseKeyPair, count: u64) -> DuplexStream {
    let handshake = NoiseHandshake::responder(&suite, &key).unwrap();
    let link = drive_handshake(&mut stream, handshake).await.unwrap();
    for nonce in 0..count {
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        let payload = link.cipher.open(nonce, &frame).unwrap();
        write_frame(&mut stream, &link.cipher.seal(nonce, &payload).unwrap())
            .await
            .unwrap();
    }
    stream
}

async fn round_trip(kind_name: &str, pattern: Option<&str>) {
    let server = NoiseKeyPair::generate();
    let client = NoiseKeyPair::generate();
    let directory = PeerDirectory::from_json_str(&published_directory(&server)).unwrap();

    let mut options = ClientChannelOptions::new(client.private_key_hex(), ["s0"]).with_engine_kind(kind_name);
    if let Some(pattern) = pattern {
        options = options.with_peer_handshake_pattern(pattern);
    }
    let config = ClientChannelConfig::resolve(Some(&options), &directory).unwrap();
    assert_eq!(config.peers.len(), 1);

    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let responder = tokio::spawn(echo_responder(server_end, config.engine_kind.suite(), server, 3));

    let mut engine = config.engine_kind.build(EngineContext {
        peer: config.peers[0].clone(),
        local_key: config.local_key.clone(),
        generation: 1,
        handshake_timeout: config.connect_timeout,
        transport: Box::new(client_end),
    });
    assert_eq!(engine.kind(), kind_name);

    let (inbound, mut received) = inbound_channel();
    let (events, _events_rx) = tokio::sync::mpsc::unbounded_channel();
    let _guard = engine.create_initiator_channel(inbound, events).await.unwrap();

    for seq in 0..3 {
        engine.send(&serde_json::json!({ "seq": seq })).unwrap();
    }
    for seq in 0..3 {
        let message = timeout(Duration::from_secs(5), received.recv()).await.unwrap().unwrap();
        assert_eq!(message.from, PeerId::from("s0"));
        assert_eq!(message.data, serde_json::json!({ "seq": seq }));
    }

    engine.close();
    responder.await.unwrap();
}

// ----------------------------------------------------------------------------
// Directory To Engine
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_noise_stream_pipeline() {
    round_trip(EngineKind::NOISE_STREAM, None).await;
}

#[tokio::test]
async fn test_noise_peer_pipeline_per_pattern() {
    for pattern in ["XX", "ik", "Xk"] {
        round_trip(EngineKind::NOISE_PEER, Some(pattern)).await;
    }
}

#[tokio::test]
async fn test_unknown_engine_name_falls_back_to_stream() {
    let server = NoiseKeyPair::generate();
    let client = NoiseKeyPair::generate();
    let directory = PeerDirectory::from_json_str(&published_directory(&server)).unwrap();
    let options = ClientChannelOptions::new(client.private_key_hex(), ["s1", "s0"]).with_engine_kind("quantum");

    let config = ClientChannelConfig::resolve(Some(&options), &directory).unwrap();
    assert_eq!(config.engine_kind, EngineKind::NoiseStream);
    let order: Vec<&str> = config.peer_ids().map(|id| id.as_str()).collect();
    assert_eq!(order, vec!["s1", "s0"]);
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

#[test]
fn test_configuration_errors_surface_through_channel_error() {
    let server = NoiseKeyPair::generate();
    let directory = PeerDirectory::from_json_str(&published_directory(&server)).unwrap();

    let unknown = ClientChannelOptions::new(NoiseKeyPair::generate().private_key_hex(), ["s9"]);
    let err: ChannelError = ClientChannelConfig::resolve(Some(&unknown), &directory)
        .unwrap_err()
        .into();
    assert!(matches!(err, ChannelError::Configuration(ConfigError::UnknownPeer { .. })));
    assert!(!err.is_peer_failure());
    assert!(err.to_string().contains("s9"));

    let malformed = ClientChannelOptions::new("not-a-key", ["s0"]);
    assert!(ClientChannelConfig::resolve(Some(&malformed), &directory).is_err());
}
