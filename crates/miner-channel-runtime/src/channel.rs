//! Client Channel
//!
//! A validation miner's outbound fan-out channel to a fixed set of storage
//! miners. Construction validates options against the peer directory;
//! `initialize` connects to every peer in parallel; `send` delivers one message
//! to every connected peer; inbound messages from all peers arrive on a single
//! receiver tagged with the sender's identifier.

use std::sync::Arc;

use futures::future::join_all;
use miner_channel_core::framing::MAX_PAYLOAD;
use miner_channel_core::{
    ChannelError, ClientChannelConfig, ClientChannelOptions, ConnectionState, EngineError, InboundSender,
    PeerDirectory, PeerId, Result,
};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::connector::{TcpConnector, TransportConnector};
use crate::supervisor::{ConnectionSupervisor, PeerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelPhase {
    Created,
    Initialized,
    Closed,
}

/// Multi-peer encrypted client channel
pub struct ClientChannel {
    config: Arc<ClientChannelConfig>,
    supervisors: Vec<ConnectionSupervisor>,
    ready: bool,
    phase: ChannelPhase,
}

impl ClientChannel {
    /// Validate `options` against `directory` and prepare one supervisor per
    /// listed peer, dialing over TCP.
    pub fn new(options: Option<&ClientChannelOptions>, directory: &PeerDirectory) -> Result<Self> {
        let config = ClientChannelConfig::resolve(options, directory)?;
        let connector = Arc::new(TcpConnector::new(config.connect_timeout));
        Ok(Self::from_config(config, connector))
    }

    /// Same as [`ClientChannel::new`] with a custom transport connector
    pub fn with_connector(
        options: Option<&ClientChannelOptions>,
        directory: &PeerDirectory,
        connector: Arc<dyn TransportConnector>,
    ) -> Result<Self> {
        let config = ClientChannelConfig::resolve(options, directory)?;
        Ok(Self::from_config(config, connector))
    }

    fn from_config(config: ClientChannelConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let config = Arc::new(config);
        let supervisors = config
            .peers
            .iter()
            .map(|peer| ConnectionSupervisor::new(config.clone(), connector.clone(), peer.clone()))
            .collect();

        debug!(
            peers = config.peers.len(),
            engine = config.engine_kind.as_str(),
            "Client channel created"
        );

        Self {
            config,
            supervisors,
            ready: false,
            phase: ChannelPhase::Created,
        }
    }

    /// Connect to every configured peer in parallel and wait for all attempts.
    /// Returns how many peers connected; zero is not an error.
    pub async fn initialize(&mut self, inbound: InboundSender) -> Result<usize> {
        match self.phase {
            ChannelPhase::Created => {}
            ChannelPhase::Initialized => return Err(ChannelError::lifecycle("client channel is already initialized")),
            ChannelPhase::Closed => return Err(ChannelError::lifecycle("client channel is closed")),
        }
        self.phase = ChannelPhase::Initialized;

        let total = self.supervisors.len();
        info!(
            peers = total,
            engine = self.config.engine_kind.as_str(),
            "Connecting client channel"
        );

        let attempts = self
            .supervisors
            .iter_mut()
            .map(|supervisor| supervisor.connect(inbound.clone()));
        let results = join_all(attempts).await;

        let mut connected = 0;
        for result in results {
            if result? {
                connected += 1;
            }
        }

        self.ready = connected > 0;
        if self.ready {
            info!(connected, total, "Client channel ready");
        } else {
            warn!(total, "Client channel could not reach any peer");
        }
        Ok(connected)
    }

    /// Serialize `message` once and deliver it to every connected peer.
    /// Peers that are not connected are skipped; nothing is queued for later.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let encoded = serde_json::to_vec(message)?;
        if encoded.len() > MAX_PAYLOAD {
            return Err(ChannelError::Engine(EngineError::PayloadTooLarge {
                size: encoded.len(),
                max: MAX_PAYLOAD,
            }));
        }

        let payload: Arc<[u8]> = encoded.into();
        let mut delivered = 0usize;
        for supervisor in &self.supervisors {
            if supervisor.deliver(payload.clone()).await {
                delivered += 1;
            }
        }
        trace!(bytes = payload.len(), delivered, "Message fanned out");
        Ok(())
    }

    /// Tear down every peer connection and stop all reconnects. Idempotent.
    pub async fn close(&mut self) {
        if self.phase == ChannelPhase::Closed {
            return;
        }
        self.phase = ChannelPhase::Closed;
        self.ready = false;

        join_all(self.supervisors.iter_mut().map(|supervisor| supervisor.close())).await;
        info!("Client channel closed");
    }

    /// Whether at least one peer connected during `initialize`
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ChannelPhase::Closed
    }

    pub async fn peer_states(&self) -> Vec<PeerStatus> {
        join_all(self.supervisors.iter().map(|supervisor| supervisor.status())).await
    }

    pub async fn connected_peers(&self) -> Vec<PeerId> {
        self.peer_states()
            .await
            .into_iter()
            .filter(|status| status.state == ConnectionState::Connected)
            .map(|status| status.peer_id)
            .collect()
    }

    pub fn config(&self) -> &ClientChannelConfig {
        &self.config
    }
}
