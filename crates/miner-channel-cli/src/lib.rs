//! Miner Channel CLI library
//!
//! Key generation for test deployments, an interactive client that fans
//! stdin lines out to storage miners, and a loopback echo peer for manual
//! testing.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod keygen;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
