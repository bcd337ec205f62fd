//! Test fixtures shared by runtime and CLI tests

use std::future::Future;
use std::time::Duration;

use miner_channel_core::{InboundMessage, InboundReceiver, NoiseKeyPair, PeerDescriptor, PeerId};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Hex-encoded private key for a throwaway client identity
pub fn random_private_key() -> String {
    NoiseKeyPair::generate().private_key_hex()
}

/// Directory entry for a loopback port that nothing listens on
pub async fn unreachable_descriptor<I: Into<PeerId>>(identifier: I) -> std::io::Result<PeerDescriptor> {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?.port()
    };
    Ok(PeerDescriptor::new(
        identifier.into(),
        "127.0.0.1",
        port,
        NoiseKeyPair::generate().public_key_bytes(),
    ))
}

/// Collect up to `count` inbound messages, giving up after `timeout`
pub async fn recv_messages(inbound: &mut InboundReceiver, count: usize, timeout: Duration) -> Vec<InboundMessage> {
    let deadline = Instant::now() + timeout;
    let mut messages = Vec::with_capacity(count);
    while messages.len() < count {
        match tokio::time::timeout_at(deadline, inbound.recv()).await {
            Ok(Some(message)) => messages.push(message),
            Ok(None) | Err(_) => break,
        }
    }
    messages
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
