//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate key files for a local test deployment of miners
    Keygen {
        /// Directory receiving the key folders and miner-public-keys.json
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Host written into every miner entry
        #[arg(long)]
        host: Option<String>,
        /// Number of markets
        #[arg(short, long)]
        markets: Option<u32>,
        /// Validation miners per market
        #[arg(long)]
        validation_per_market: Option<u32>,
        /// Storage miners per market
        #[arg(long)]
        storage_per_market: Option<u32>,
    },
    /// Connect to storage miners, send stdin lines as JSON and print replies
    Connect {
        /// Published peer directory
        #[arg(short, long)]
        directory: Option<PathBuf>,
        /// Hex-encoded private key of this client
        #[arg(long, conflicts_with = "key_file")]
        key: Option<String>,
        /// Miner key file holding this client's secretKey
        #[arg(long)]
        key_file: Option<PathBuf>,
        /// Peers to connect to, e.g. s0,s1,s2
        #[arg(short, long, value_delimiter = ',')]
        peers: Vec<String>,
        /// Secure channel engine: noise-stream or noise-peer
        #[arg(short, long)]
        engine: Option<String>,
        /// Handshake pattern for noise-peer: XX, IK or XK
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Run an echoing responder for one miner key file
    Serve {
        /// Miner key file (serverAddress, serverPort, secretKey)
        key_file: PathBuf,
        /// Secure channel engine the clients use: noise-stream or noise-peer
        #[arg(short, long)]
        engine: Option<String>,
        /// Handshake pattern for noise-peer: XX, IK or XK
        #[arg(long)]
        pattern: Option<String>,
    },
}
