//! Command handlers for the miner channel CLI

use std::net::SocketAddr;
use std::path::PathBuf;

use miner_channel_core::{EngineKind, MinerRecord, NoiseKeyPair, PeerDirectory};
use miner_channel_harness::TestPeer;
use miner_channel_runtime::{inbound_channel, ClientChannel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, ClientSection};
use crate::error::{CliError, Result};
use crate::keygen;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Keygen {
                output_dir,
                host,
                markets,
                validation_per_market,
                storage_per_market,
            } => {
                let mut settings = config.keygen;
                if let Some(output_dir) = output_dir {
                    settings.output_dir = output_dir;
                }
                if let Some(host) = host {
                    settings.host = host;
                }
                if let Some(markets) = markets {
                    settings.markets = markets;
                }
                if let Some(count) = validation_per_market {
                    settings.validation_miners_per_market = count;
                }
                if let Some(count) = storage_per_market {
                    settings.storage_miners_per_market = count;
                }
                Self::handle_keygen_command(&settings)
            }
            Commands::Connect {
                directory,
                key,
                key_file,
                peers,
                engine,
                pattern,
            } => {
                let mut client = config.client;
                if !peers.is_empty() {
                    client.peers = peers;
                }
                if let Some(engine) = engine {
                    client.engine = engine;
                }
                if let Some(pattern) = pattern {
                    client.handshake_pattern = pattern;
                }
                if key_file.is_some() {
                    client.key_file = key_file;
                }
                let directory = directory.unwrap_or(config.directory);
                Self::handle_connect_command(directory, client, key).await
            }
            Commands::Serve {
                key_file,
                engine,
                pattern,
            } => {
                let engine = engine.unwrap_or(config.client.engine);
                let pattern = pattern.unwrap_or(config.client.handshake_pattern);
                let kind = EngineKind::from_names(Some(&engine), Some(&pattern));
                Self::handle_serve_command(key_file, kind).await
            }
        }
    }

    fn handle_keygen_command(settings: &crate::config::KeygenSection) -> Result<()> {
        let summary = keygen::run(settings)?;
        println!(
            "Generated {} validation and {} storage miner keys; public keys in {}",
            summary.validation_miners,
            summary.storage_miners,
            summary.public_keys_file.display()
        );
        Ok(())
    }

    async fn handle_connect_command(directory: PathBuf, client: ClientSection, key: Option<String>) -> Result<()> {
        let private_key = match (key, client.key_file.as_ref()) {
            (Some(key), _) => Some(key),
            (None, Some(path)) => MinerRecord::load(path)?.secret_key,
            (None, None) => None,
        };

        let directory = PeerDirectory::load(&directory)?;
        let options = client.to_options(private_key);
        let mut channel = ClientChannel::new(Some(&options), &directory)?;

        let (inbound, mut received) = inbound_channel();
        let connected = channel.initialize(inbound).await?;
        if !channel.is_ready() {
            warn!("No storage miner is reachable; messages will be dropped");
        }
        info!(connected, total = channel.config().peers.len(), "Client channel initialized");

        let printer = tokio::spawn(async move {
            while let Some(message) = received.recv().await {
                println!("[{}] {}", message.from, message.data);
            }
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let message = serde_json::from_str::<serde_json::Value>(line)
                        .unwrap_or_else(|_| serde_json::Value::String(line.to_string()));
                    channel.send(&message).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, closing client channel");
                    break;
                }
            }
        }

        channel.close().await;
        printer.abort();
        Ok(())
    }

    async fn handle_serve_command(key_file: PathBuf, kind: EngineKind) -> Result<()> {
        let record = MinerRecord::load(&key_file)?;
        let secret = record
            .secret_key
            .as_deref()
            .ok_or_else(|| CliError::Config(format!("{} has no secretKey", key_file.display())))?;
        let key = NoiseKeyPair::from_hex(secret)?;

        let address = resolve(&record.server_address, record.server_port).await?;
        let mut peer = TestPeer::bind(key, kind, address).await?;
        println!(
            "Serving {} on {} (public key {})",
            kind.suite().protocol_name(),
            peer.address(),
            record.public_key
        );

        tokio::signal::ctrl_c().await?;
        let received = peer.received().await.len();
        let open_sessions = peer.open_sessions().await;
        info!(received, open_sessions, handshakes = peer.handshakes(), "Shutting down echo peer");
        peer.shutdown().await;
        Ok(())
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| CliError::Config(format!("cannot resolve {}:{}", host, port)))
}
