//! Miner key generation for test deployments
//!
//! Produces one key file per miner (`<output>/validation-miner-keys/v<N>.json`,
//! `<output>/storage-miner-keys/s<N>.json`, each holding the secret key) and
//! the published directory `<output>/miner-public-keys.json` with secrets
//! stripped and identifiers added. In production every miner generates its own
//! keys privately; this is only for local networks.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use miner_channel_core::{MinerRecord, NoiseKeyPair, PeerId};
use tracing::{debug, info};

use crate::config::KeygenSection;
use crate::error::{CliError, Result};

pub const PUBLIC_KEYS_FILE: &str = "miner-public-keys.json";

/// Kind of miner a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerRole {
    Validation,
    Storage,
}

impl MinerRole {
    pub fn prefix(&self) -> &'static str {
        match self {
            MinerRole::Validation => "v",
            MinerRole::Storage => "s",
        }
    }

    pub fn key_dir(&self) -> &'static str {
        match self {
            MinerRole::Validation => "validation-miner-keys",
            MinerRole::Storage => "storage-miner-keys",
        }
    }
}

/// What a keygen run wrote
#[derive(Debug, Clone)]
pub struct KeygenSummary {
    pub validation_miners: usize,
    pub storage_miners: usize,
    pub public_keys_file: PathBuf,
}

/// Fresh key records for `count` miners of one role, on consecutive ports
pub fn generate_records(
    role: MinerRole,
    count: u32,
    start_port: u16,
    host: &str,
) -> Result<BTreeMap<PeerId, MinerRecord>> {
    let mut records = BTreeMap::new();
    for index in 0..count {
        let port = u16::try_from(u32::from(start_port) + index).map_err(|_| {
            CliError::Keygen(format!(
                "{} {} miners starting at port {} exceed the port range",
                count,
                role.prefix(),
                start_port
            ))
        })?;
        let keypair = NoiseKeyPair::generate();
        let record = MinerRecord {
            server_address: host.to_string(),
            server_port: port,
            public_key: keypair.public_key_hex(),
            secret_key: Some(keypair.private_key_hex()),
            identifier: None,
        };
        records.insert(PeerId::new(format!("{}{}", role.prefix(), index)), record);
    }
    Ok(records)
}

/// Generate every key file and the published directory
pub fn run(settings: &KeygenSection) -> Result<KeygenSummary> {
    let mut published: BTreeMap<String, MinerRecord> = BTreeMap::new();

    let roles = [
        (
            MinerRole::Validation,
            settings.validation_miners_per_market,
            settings.validation_start_port,
        ),
        (
            MinerRole::Storage,
            settings.storage_miners_per_market,
            settings.storage_start_port,
        ),
    ];

    let mut counts = [0usize; 2];
    for (slot, (role, per_market, start_port)) in roles.into_iter().enumerate() {
        let count = settings
            .markets
            .checked_mul(per_market)
            .ok_or_else(|| CliError::Keygen("miner count overflows".to_string()))?;
        let records = generate_records(role, count, start_port, &settings.host)?;

        let folder = settings.output_dir.join(role.key_dir());
        clear_key_files(&folder)?;
        fs::create_dir_all(&folder)?;
        for (identifier, record) in &records {
            let path = folder.join(format!("{}.json", identifier));
            fs::write(&path, serde_json::to_string_pretty(record)?)?;
            published.insert(identifier.to_string(), record.published(identifier));
        }

        debug!(role = role.prefix(), count, folder = %folder.display(), "Wrote miner key files");
        counts[slot] = records.len();
    }

    fs::create_dir_all(&settings.output_dir)?;
    let public_keys_file = settings.output_dir.join(PUBLIC_KEYS_FILE);
    fs::write(&public_keys_file, serde_json::to_string_pretty(&published)?)?;

    info!(
        validation = counts[0],
        storage = counts[1],
        file = %public_keys_file.display(),
        "Published miner public keys"
    );

    Ok(KeygenSummary {
        validation_miners: counts[0],
        storage_miners: counts[1],
        public_keys_file,
    })
}

/// Remove every file below `folder`, keeping the directories themselves
fn clear_key_files(folder: &Path) -> Result<()> {
    if !folder.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_dir() {
            clear_key_files(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner_channel_core::PeerDirectory;

    fn small_layout(output_dir: &Path) -> KeygenSection {
        KeygenSection {
            output_dir: output_dir.to_path_buf(),
            markets: 2,
            validation_miners_per_market: 3,
            storage_miners_per_market: 2,
            ..KeygenSection::default()
        }
    }

    #[test]
    fn test_generates_key_files_and_public_directory() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&small_layout(dir.path())).unwrap();
        assert_eq!(summary.validation_miners, 6);
        assert_eq!(summary.storage_miners, 4);

        let directory = PeerDirectory::load(&summary.public_keys_file).unwrap();
        assert_eq!(directory.len(), 10);
        assert_eq!(directory.identifiers_with_prefix("s").count(), 4);

        let s1 = directory.lookup(&PeerId::from("s1")).unwrap();
        assert_eq!(s1.port, 4041);
        assert_eq!(s1.address, "localhost");
        let v5 = directory.lookup(&PeerId::from("v5")).unwrap();
        assert_eq!(v5.port, 2025);

        let published = fs::read_to_string(&summary.public_keys_file).unwrap();
        assert!(!published.contains("secretKey"));
        assert!(published.contains(r#""identifier": "s1""#));
    }

    #[test]
    fn test_key_file_secret_matches_published_key() {
        let dir = tempfile::tempdir().unwrap();
        let summary = run(&small_layout(dir.path())).unwrap();
        let directory = PeerDirectory::load(&summary.public_keys_file).unwrap();

        let record = MinerRecord::load(dir.path().join("storage-miner-keys").join("s0.json")).unwrap();
        let keypair = NoiseKeyPair::from_hex(record.secret_key.as_deref().unwrap()).unwrap();
        assert_eq!(
            keypair.public_key_bytes(),
            directory.lookup(&PeerId::from("s0")).unwrap().public_key
        );
    }

    #[test]
    fn test_rerun_clears_stale_key_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale_folder = dir.path().join("storage-miner-keys");
        fs::create_dir_all(&stale_folder).unwrap();
        fs::write(stale_folder.join("s99.json"), "{}").unwrap();

        run(&small_layout(dir.path())).unwrap();
        assert!(!stale_folder.join("s99.json").exists());
        assert_eq!(fs::read_dir(&stale_folder).unwrap().count(), 4);
    }

    #[test]
    fn test_port_range_overflow_is_an_error() {
        assert!(matches!(
            generate_records(MinerRole::Storage, 10, 65530, "localhost"),
            Err(CliError::Keygen(_))
        ));
    }
}
