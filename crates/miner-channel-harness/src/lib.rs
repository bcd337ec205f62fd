//! Miner Channel Harness
//!
//! Loopback infrastructure for exercising client channels end to end:
//! - [`TestPeer`]: a real TCP listener speaking the responder side of either
//!   engine's Noise suite, echoing every frame and recording what it received,
//!   with hooks to drop connections, shut down and restart on the same port
//! - fixtures for keys, unreachable peers and bounded waits

pub mod fixtures;
pub mod responder;

pub use fixtures::{random_private_key, recv_messages, unreachable_descriptor, wait_until};
pub use responder::TestPeer;
