//! Connection Supervisor
//!
//! Owns the lifecycle of one peer connection:
//! - the initial connect (no automatic retry if it fails),
//! - a watcher task that reacts to closure of the live engine,
//! - bounded exponential-backoff reconnects driven by a [`RepeatingTimer`],
//! - teardown on close.
//!
//! All transitions for a peer happen under that peer's lock. Every engine is
//! stamped with a generation so closure events from replaced engines are ignored.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use miner_channel_core::{
    ChannelError, ClientChannelConfig, ConnectionState, EngineContext, InboundSender, LinkEvent, LinkEventReceiver,
    LinkEventSender, PeerDescriptor, PeerId, Result, SecureChannelEngine, TransportGuard,
};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::{ConnectOutcome, TransportConnector};
use crate::timer::{RepeatingTimer, TimerOutcome, TimerStopHandle, WaitSchedule};

// ----------------------------------------------------------------------------
// Peer Connection Record
// ----------------------------------------------------------------------------

/// Snapshot of one peer's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub peer_id: PeerId,
    pub state: ConnectionState,
    pub retry_count: u32,
}

struct PeerConnection {
    state: ConnectionState,
    engine: Option<Box<dyn SecureChannelEngine>>,
    transport: Option<TransportGuard>,
    retry_count: u32,
    generation: u64,
    reconnect_timer: Option<TimerStopHandle>,
    closed: bool,
}

impl PeerConnection {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            engine: None,
            transport: None,
            retry_count: 0,
            generation: 0,
            reconnect_timer: None,
            closed: false,
        }
    }

    fn install(&mut self, link: OpenLink) {
        self.generation = link.engine.generation();
        self.engine = Some(link.engine);
        self.transport = Some(link.transport);
        self.retry_count = 0;
        self.state = ConnectionState::Connected;
    }

    fn detach(&mut self) -> Option<OpenLink> {
        let engine = self.engine.take();
        let transport = self.transport.take();
        match (engine, transport) {
            (Some(engine), Some(transport)) => Some(OpenLink { engine, transport }),
            _ => None,
        }
    }
}

/// An engine with its running transport tasks
struct OpenLink {
    engine: Box<dyn SecureChannelEngine>,
    transport: TransportGuard,
}

impl OpenLink {
    /// End the write side, then release the transport
    async fn shut_down(mut self) {
        self.engine.close();
        self.transport.release().await;
    }
}

struct Shared {
    config: Arc<ClientChannelConfig>,
    connector: Arc<dyn TransportConnector>,
    descriptor: PeerDescriptor,
    connection: Mutex<PeerConnection>,
    next_generation: AtomicU64,
}

// ----------------------------------------------------------------------------
// Connection Supervisor
// ----------------------------------------------------------------------------

/// Drives one peer through Disconnected, Connecting, Connected, Reconnecting
/// and Failed
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
    watcher: Option<JoinHandle<()>>,
}

impl ConnectionSupervisor {
    pub fn new(
        config: Arc<ClientChannelConfig>,
        connector: Arc<dyn TransportConnector>,
        descriptor: PeerDescriptor,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                descriptor,
                connection: Mutex::new(PeerConnection::new()),
                next_generation: AtomicU64::new(0),
            }),
            watcher: None,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.shared.descriptor.identifier
    }

    /// Initial connection attempt. Returns whether the peer reached
    /// `Connected`; an unreachable or misbehaving peer is `Ok(false)`.
    pub async fn connect(&mut self, inbound: InboundSender) -> Result<bool> {
        let peer_id = self.peer_id().clone();
        {
            let mut connection = self.shared.connection.lock().await;
            if connection.closed {
                return Err(ChannelError::lifecycle(format!("supervisor for peer {} is closed", peer_id)));
            }
            if connection.state != ConnectionState::Disconnected {
                return Err(ChannelError::lifecycle(format!(
                    "peer {} is already {}",
                    peer_id, connection.state
                )));
            }
            connection.state = ConnectionState::Connecting;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let result = open_link(&self.shared, inbound.clone(), events_tx.clone()).await;

        let mut connection = self.shared.connection.lock().await;
        match result {
            Ok(link) => {
                if connection.closed {
                    drop(connection);
                    link.shut_down().await;
                    return Ok(false);
                }
                connection.install(link);
                info!(peer = %peer_id, generation = connection.generation, "Connected to peer");
                drop(connection);

                self.watcher = Some(tokio::spawn(watch_link(
                    self.shared.clone(),
                    inbound,
                    events_tx,
                    events_rx,
                )));
                Ok(true)
            }
            Err(e) if e.is_peer_failure() => {
                warn!(peer = %peer_id, error = %e, "Initial connection to peer failed");
                connection.state = ConnectionState::Disconnected;
                Ok(false)
            }
            Err(e) => {
                connection.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Hand an encoded payload to the live engine. No-op unless `Connected`.
    pub async fn deliver(&self, payload: Arc<[u8]>) -> bool {
        let connection = self.shared.connection.lock().await;
        if !connection.state.can_send() {
            return false;
        }
        let Some(engine) = connection.engine.as_ref() else {
            return false;
        };

        match engine.send_frame(payload) {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %self.peer_id(), error = %e, "Dropping message for peer");
                false
            }
        }
    }

    pub async fn status(&self) -> PeerStatus {
        let connection = self.shared.connection.lock().await;
        PeerStatus {
            peer_id: self.peer_id().clone(),
            state: connection.state,
            retry_count: connection.retry_count,
        }
    }

    /// Stop reconnecting and tear down the live engine, if any. Idempotent.
    pub async fn close(&mut self) {
        let (link, timer) = {
            let mut connection = self.shared.connection.lock().await;
            if connection.closed {
                return;
            }
            connection.closed = true;
            connection.state = ConnectionState::Disconnected;
            (connection.detach(), connection.reconnect_timer.take())
        };

        if let Some(timer) = timer {
            timer.stop();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Some(link) = link {
            link.shut_down().await;
        }
        debug!(peer = %self.peer_id(), "Peer supervisor closed");
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if let Ok(mut connection) = self.shared.connection.try_lock() {
            connection.closed = true;
            if let Some(timer) = connection.reconnect_timer.take() {
                timer.stop();
            }
            // Dropping the guard aborts the transport tasks
            connection.detach();
        }
    }
}

// ----------------------------------------------------------------------------
// Link Establishment
// ----------------------------------------------------------------------------

async fn open_link(shared: &Shared, inbound: InboundSender, events: LinkEventSender) -> Result<OpenLink> {
    let descriptor = &shared.descriptor;
    let transport = match shared.connector.connect(descriptor).await {
        ConnectOutcome::Connected(transport) => transport,
        ConnectOutcome::Unreachable(error) => return Err(error.into()),
    };

    let generation = shared.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
    let mut engine = shared.config.engine_kind.build(EngineContext {
        peer: descriptor.clone(),
        local_key: shared.config.local_key.clone(),
        generation,
        handshake_timeout: shared.config.connect_timeout,
        transport,
    });
    let transport = engine.create_initiator_channel(inbound, events).await?;
    Ok(OpenLink { engine, transport })
}

// ----------------------------------------------------------------------------
// Close Watcher and Reconnection
// ----------------------------------------------------------------------------

async fn watch_link(
    shared: Arc<Shared>,
    inbound: InboundSender,
    events_tx: LinkEventSender,
    mut events_rx: LinkEventReceiver,
) {
    let peer_id = shared.descriptor.identifier.clone();

    while let Some(event) = events_rx.recv().await {
        let LinkEvent::Closed { generation, reason, .. } = event;

        let stale_link = {
            let mut connection = shared.connection.lock().await;
            if connection.closed {
                return;
            }
            if connection.state != ConnectionState::Connected || connection.generation != generation {
                debug!(peer = %peer_id, generation, "Ignoring closure of replaced engine");
                continue;
            }
            warn!(peer = %peer_id, generation, %reason, "Connection to peer lost, reconnecting");
            connection.state = ConnectionState::Reconnecting;
            connection.retry_count = 0;
            connection.detach()
        };

        if let Some(link) = stale_link {
            link.shut_down().await;
        }
        reconnect(&shared, &inbound, &events_tx).await;
    }
}

async fn reconnect(shared: &Arc<Shared>, inbound: &InboundSender, events: &LinkEventSender) {
    let retry = shared.config.retry.clone();
    let attempts = retry.attempts;

    let tick_shared = shared.clone();
    let tick_inbound = inbound.clone();
    let tick_events = events.clone();
    let timer = RepeatingTimer::start(WaitSchedule::Backoff(retry), Some(attempts), move |attempt| {
        let shared = tick_shared.clone();
        let inbound = tick_inbound.clone();
        let events = tick_events.clone();
        async move { reconnect_attempt(&shared, attempt, inbound, events).await }
    });

    {
        let mut connection = shared.connection.lock().await;
        if connection.closed {
            timer.stop();
        } else {
            connection.reconnect_timer = Some(timer.stop_handle());
        }
    }

    let outcome = timer.join().await;

    let mut connection = shared.connection.lock().await;
    connection.reconnect_timer = None;
    if outcome == TimerOutcome::Exhausted && !connection.closed && connection.state == ConnectionState::Reconnecting {
        connection.state = ConnectionState::Failed;
        error!(
            peer = %shared.descriptor.identifier,
            attempts = connection.retry_count,
            "Reconnect attempts exhausted, giving up on peer"
        );
    }
}

async fn reconnect_attempt(
    shared: &Shared,
    attempt: u32,
    inbound: InboundSender,
    events: LinkEventSender,
) -> ControlFlow<()> {
    let peer_id = &shared.descriptor.identifier;
    {
        let connection = shared.connection.lock().await;
        if connection.closed || connection.state != ConnectionState::Reconnecting {
            return ControlFlow::Break(());
        }
    }

    debug!(
        peer = %peer_id,
        attempt = attempt + 1,
        of = shared.config.retry.attempts,
        "Reconnecting to peer"
    );

    match open_link(shared, inbound, events).await {
        Ok(link) => {
            let mut connection = shared.connection.lock().await;
            if connection.closed {
                drop(connection);
                link.shut_down().await;
                return ControlFlow::Break(());
            }
            connection.install(link);
            info!(peer = %peer_id, generation = connection.generation, "Reconnected to peer");
            ControlFlow::Break(())
        }
        Err(e) => {
            let mut connection = shared.connection.lock().await;
            connection.retry_count += 1;
            warn!(
                peer = %peer_id,
                retry_count = connection.retry_count,
                error = %e,
                "Reconnect attempt failed"
            );
            ControlFlow::Continue(())
        }
    }
}
