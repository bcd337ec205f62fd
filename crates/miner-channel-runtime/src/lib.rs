//! Miner Channel Runtime
//!
//! Orchestration for the validation-miner client channel:
//! - `ClientChannel`: validated construction, parallel initialize, fan-out send, close
//! - `ConnectionSupervisor`: per-peer state machine with bounded reconnects
//! - `RepeatingTimer`: stoppable repeating timer used for reconnect scheduling
//! - `TransportConnector`: pluggable raw stream opener (TCP by default)

pub mod channel;
pub mod connector;
pub mod supervisor;
pub mod timer;

pub use channel::ClientChannel;
pub use connector::{ConnectOutcome, TcpConnector, TransportConnector};
pub use supervisor::{ConnectionSupervisor, PeerStatus};
pub use timer::{RepeatingTimer, TimerOutcome, TimerStopHandle, WaitSchedule};

// Re-export core types for convenience
pub use miner_channel_core::{
    inbound_channel, ChannelError, ClientChannelConfig, ClientChannelOptions, ConfigError, ConnectionState,
    EngineKind, HandshakePattern, InboundMessage, InboundReceiver, InboundSender, PeerDescriptor, PeerDirectory,
    PeerId, Result, TransportError,
};
