//! Raw transport connectors
//!
//! A connector opens the unencrypted byte stream to a peer. Failure is an
//! outcome, not an error: the supervisor decides what an unreachable peer means.

use std::time::Duration;

use async_trait::async_trait;
use miner_channel_core::{PeerDescriptor, RawTransport, TransportError};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Result of one connection attempt
pub enum ConnectOutcome {
    Connected(RawTransport),
    Unreachable(TransportError),
}

impl core::fmt::Debug for ConnectOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConnectOutcome::Connected(_) => f.write_str("Connected(<transport>)"),
            ConnectOutcome::Unreachable(error) => f.debug_tuple("Unreachable").field(error).finish(),
        }
    }
}

impl ConnectOutcome {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectOutcome::Connected(_))
    }
}

/// Opens raw byte streams to peers
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, peer: &PeerDescriptor) -> ConnectOutcome;
}

// ----------------------------------------------------------------------------
// TCP Connector
// ----------------------------------------------------------------------------

/// Plain TCP to `serverAddress:serverPort`, bounded by a connect timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self, peer: &PeerDescriptor) -> ConnectOutcome {
        let endpoint = peer.endpoint();
        trace!(peer = %peer.identifier, %endpoint, "Dialing peer");

        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!(peer = %peer.identifier, %endpoint, error = %e, "Peer unreachable");
                return ConnectOutcome::Unreachable(TransportError::connection_failed(&peer.identifier, e.to_string()));
            }
            Err(_) => {
                debug!(peer = %peer.identifier, %endpoint, "Connect timed out");
                return ConnectOutcome::Unreachable(TransportError::timeout(&peer.identifier, self.timeout));
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!(peer = %peer.identifier, error = %e, "Failed to set TCP_NODELAY");
        }
        ConnectOutcome::Connected(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner_channel_core::PeerId;
    use tokio::net::TcpListener;

    fn descriptor(port: u16) -> PeerDescriptor {
        PeerDescriptor::new(PeerId::from("s0"), "127.0.0.1", port, [0u8; 32])
    }

    #[tokio::test]
    async fn test_connects_to_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = TcpConnector::new(Duration::from_secs(1)).connect(&descriptor(port)).await;
        assert!(outcome.is_connected());
    }

    #[tokio::test]
    async fn test_refused_port_is_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let outcome = TcpConnector::new(Duration::from_secs(1)).connect(&descriptor(port)).await;
        match outcome {
            ConnectOutcome::Unreachable(TransportError::ConnectionFailed { peer_id, .. }) => {
                assert_eq!(peer_id, PeerId::from("s0"))
            }
            other => panic!("expected a refused connection, got {:?}", other),
        }
    }
}
