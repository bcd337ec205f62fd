//! Loopback responder peer
//!
//! A TCP listener that completes the Noise handshake as responder and echoes
//! every decrypted frame back to the sender. Stands in for a storage miner in
//! tests and in the CLI `serve` command.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use miner_channel_core::framing::{read_frame, write_frame};
use miner_channel_core::handshake::drive_handshake;
use miner_channel_core::{EngineKind, NoiseHandshake, NoiseKeyPair, NoiseSuite, PeerDescriptor, PeerId, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct PeerState {
    received: Mutex<Vec<serde_json::Value>>,
    sessions: Mutex<Vec<JoinHandle<()>>>,
    handshakes: AtomicUsize,
}

/// Echoing Noise responder bound to a loopback port
pub struct TestPeer {
    key: NoiseKeyPair,
    suite: NoiseSuite,
    address: SocketAddr,
    state: Arc<PeerState>,
    listener: Option<JoinHandle<()>>,
}

impl TestPeer {
    /// Fresh key, ephemeral loopback port
    pub async fn spawn(kind: EngineKind) -> std::io::Result<Self> {
        Self::bind(NoiseKeyPair::generate(), kind, SocketAddr::from(([127, 0, 0, 1], 0))).await
    }

    /// Listen on `address` with a given static key
    pub async fn bind(key: NoiseKeyPair, kind: EngineKind, address: SocketAddr) -> std::io::Result<Self> {
        let mut peer = Self {
            key,
            suite: kind.suite(),
            address,
            state: Arc::new(PeerState::default()),
            listener: None,
        };
        peer.listen().await?;
        Ok(peer)
    }

    async fn listen(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.address).await?;
        self.address = listener.local_addr()?;
        info!(
            address = %self.address,
            protocol = %self.suite.protocol_name(),
            "Test peer listening"
        );
        self.listener = Some(tokio::spawn(accept_loop(
            listener,
            self.suite,
            self.key.clone(),
            self.state.clone(),
        )));
        Ok(())
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.public_key_bytes()
    }

    /// Directory entry pointing at this peer
    pub fn descriptor<I: Into<PeerId>>(&self, identifier: I) -> PeerDescriptor {
        PeerDescriptor::new(
            identifier.into(),
            self.address.ip().to_string(),
            self.address.port(),
            self.public_key(),
        )
    }

    /// Every JSON message received so far, across all sessions
    pub async fn received(&self) -> Vec<serde_json::Value> {
        self.state.received.lock().await.clone()
    }

    /// Completed handshakes, one per accepted client connection
    pub fn handshakes(&self) -> usize {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    /// Sessions still being served
    pub async fn open_sessions(&self) -> usize {
        let mut sessions = self.state.sessions.lock().await;
        sessions.retain(|session| !session.is_finished());
        sessions.len()
    }

    /// Sever all open sessions while continuing to accept new ones
    pub async fn drop_connections(&self) {
        let sessions: Vec<_> = self.state.sessions.lock().await.drain(..).collect();
        for session in sessions {
            session.abort();
            let _ = session.await;
        }
        debug!(address = %self.address, "Test peer dropped its connections");
    }

    /// Stop listening and sever all sessions
    pub async fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            let _ = listener.await;
        }
        self.drop_connections().await;
        info!(address = %self.address, "Test peer shut down");
    }

    /// Listen again on the same address after `shutdown`
    pub async fn restart(&mut self) -> std::io::Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        self.listen().await
    }
}

impl Drop for TestPeer {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Ok(mut sessions) = self.state.sessions.try_lock() {
            for session in sessions.drain(..) {
                session.abort();
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Sessions
// ----------------------------------------------------------------------------

async fn accept_loop(listener: TcpListener, suite: NoiseSuite, key: NoiseKeyPair, state: Arc<PeerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!(%remote, "Test peer accepted connection");
                let _ = stream.set_nodelay(true);
                let session = tokio::spawn(serve_session(stream, suite, key.clone(), state.clone()));
                let mut sessions = state.sessions.lock().await;
                sessions.retain(|session| !session.is_finished());
                sessions.push(session);
            }
            Err(e) => {
                warn!(error = %e, "Test peer accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn serve_session<S>(mut stream: S, suite: NoiseSuite, key: NoiseKeyPair, state: Arc<PeerState>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match echo_frames(&mut stream, suite, &key, &state).await {
        Ok(()) => debug!("Test peer session ended"),
        Err(e) => debug!(error = %e, "Test peer session failed"),
    }
}

async fn echo_frames<S>(stream: &mut S, suite: NoiseSuite, key: &NoiseKeyPair, state: &PeerState) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = NoiseHandshake::responder(&suite, key)?;
    let link = drive_handshake(stream, handshake).await?;
    state.handshakes.fetch_add(1, Ordering::SeqCst);

    let mut nonce = 0u64;
    while let Some(frame) = read_frame(stream).await? {
        let payload = link.cipher.open(nonce, &frame)?;
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&payload) {
            state.received.lock().await.push(value);
        }
        write_frame(stream, &link.cipher.seal(nonce, &payload)?).await?;
        nonce += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner_channel_core::HandshakePattern;
    use tokio::net::TcpStream;

    async fn dial(peer: &TestPeer, client: &NoiseKeyPair) -> (TcpStream, miner_channel_core::LinkCipher) {
        let mut stream = TcpStream::connect(peer.address()).await.unwrap();
        let handshake = NoiseHandshake::initiator(&peer.suite, client, &peer.public_key()).unwrap();
        let link = drive_handshake(&mut stream, handshake).await.unwrap();
        (stream, link.cipher)
    }

    #[tokio::test]
    async fn test_peer_echoes_and_records() {
        let peer = TestPeer::spawn(EngineKind::NoisePeer {
            pattern: HandshakePattern::Ik,
        })
        .await
        .unwrap();
        let client = NoiseKeyPair::generate();
        let (mut stream, cipher) = dial(&peer, &client).await;

        write_frame(&mut stream, &cipher.seal(0, br#"{"hello":1}"#).unwrap()).await.unwrap();
        let reply = read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(cipher.open(0, &reply).unwrap(), br#"{"hello":1}"#);

        assert_eq!(peer.handshakes(), 1);
        assert_eq!(peer.received().await, vec![serde_json::json!({"hello": 1})]);
    }

    #[tokio::test]
    async fn test_drop_connections_closes_sessions() {
        let peer = TestPeer::spawn(EngineKind::NoiseStream).await.unwrap();
        let client = NoiseKeyPair::generate();
        let (mut stream, _cipher) = dial(&peer, &client).await;

        peer.drop_connections().await;
        assert!(read_frame(&mut stream).await.map(|frame| frame.is_none()).unwrap_or(true));
    }

    #[tokio::test]
    async fn test_finished_sessions_are_pruned() {
        let peer = TestPeer::spawn(EngineKind::NoiseStream).await.unwrap();
        let client = NoiseKeyPair::generate();

        for _ in 0..3 {
            let (stream, _cipher) = dial(&peer, &client).await;
            drop(stream);
        }
        let peer_ref = &peer;
        assert!(
            crate::wait_until(Duration::from_secs(5), move || async move { peer_ref.open_sessions().await == 0 })
                .await
        );

        let (_stream, _cipher) = dial(&peer, &client).await;
        assert_eq!(peer.state.sessions.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_rebinds_same_port() {
        let mut peer = TestPeer::spawn(EngineKind::NoiseStream).await.unwrap();
        let address = peer.address();

        peer.shutdown().await;
        assert!(TcpStream::connect(address).await.is_err());

        peer.restart().await.unwrap();
        assert_eq!(peer.address(), address);
        let client = NoiseKeyPair::generate();
        let (mut stream, cipher) = dial(&peer, &client).await;
        write_frame(&mut stream, &cipher.seal(0, b"[]").unwrap()).await.unwrap();
        assert!(read_frame(&mut stream).await.unwrap().is_some());
        assert_eq!(peer.handshakes(), 1);
    }
}
