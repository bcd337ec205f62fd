//! Peer directory
//!
//! Read-only lookup table from miner identifier to connection endpoint and
//! static public key. The on-disk format is the JSON object published by the
//! key-generation tooling:
//!
//! ```json
//! { "s0": { "serverAddress": "localhost", "serverPort": 4040,
//!           "publicKey": "<hex>", "identifier": "s0" } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::decode_key;
use crate::errors::ConfigError;
use crate::types::PeerId;

// ----------------------------------------------------------------------------
// Miner Records
// ----------------------------------------------------------------------------

/// Serialized form of a miner entry, shared by the public directory and the
/// per-miner key files (which additionally carry `secretKey`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerRecord {
    pub server_address: String,
    pub server_port: u16,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl MinerRecord {
    /// Copy of this record suitable for publishing: secret removed, identifier set
    pub fn published(&self, identifier: &PeerId) -> Self {
        Self {
            secret_key: None,
            identifier: Some(identifier.to_string()),
            ..self.clone()
        }
    }

    /// Load a single miner key file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::DirectoryUnavailable {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::DirectoryUnavailable {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })
    }
}

// ----------------------------------------------------------------------------
// Peer Descriptor
// ----------------------------------------------------------------------------

/// Validated, immutable description of a remote miner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub identifier: PeerId,
    pub address: String,
    pub port: u16,
    pub public_key: [u8; 32],
}

impl PeerDescriptor {
    pub fn new<A: Into<String>>(identifier: PeerId, address: A, port: u16, public_key: [u8; 32]) -> Self {
        Self {
            identifier,
            address: address.into(),
            port,
            public_key,
        }
    }

    /// Validate a serialized record
    pub fn from_record(identifier: PeerId, record: &MinerRecord) -> Result<Self, ConfigError> {
        let public_key = decode_key(&record.public_key).map_err(|reason| ConfigError::InvalidDirectoryEntry {
            peer_id: identifier.clone(),
            reason: format!("publicKey: {}", reason),
        })?;
        Ok(Self::new(
            identifier,
            record.server_address.clone(),
            record.server_port,
            public_key,
        ))
    }

    /// `address:port`, as handed to the connector
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn to_record(&self) -> MinerRecord {
        MinerRecord {
            server_address: self.address.clone(),
            server_port: self.port,
            public_key: hex::encode(self.public_key),
            secret_key: None,
            identifier: Some(self.identifier.to_string()),
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Directory
// ----------------------------------------------------------------------------

/// Known miners by identifier
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    peers: BTreeMap<PeerId, PeerDescriptor>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from already-validated descriptors
    pub fn from_descriptors<I: IntoIterator<Item = PeerDescriptor>>(descriptors: I) -> Self {
        let mut directory = Self::new();
        for descriptor in descriptors {
            directory.insert(descriptor);
        }
        directory
    }

    /// Parse the published JSON form
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let records: BTreeMap<String, MinerRecord> =
            serde_json::from_str(json).map_err(|e| ConfigError::DirectoryUnavailable { reason: e.to_string() })?;

        let mut directory = Self::new();
        for (identifier, record) in records {
            directory.insert(PeerDescriptor::from_record(PeerId::from(identifier), &record)?);
        }
        Ok(directory)
    }

    /// Load the published JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::DirectoryUnavailable {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })?;
        let directory = Self::from_json_str(&contents)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            peers = directory.len(),
            "Loaded peer directory"
        );
        Ok(directory)
    }

    pub fn insert(&mut self, descriptor: PeerDescriptor) {
        self.peers.insert(descriptor.identifier.clone(), descriptor);
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerDescriptor> {
        self.peers.get(peer_id)
    }

    /// Resolve an identifier, failing with the stable unknown-peer error
    pub fn lookup(&self, peer_id: &PeerId) -> Result<PeerDescriptor, ConfigError> {
        self.get(peer_id).cloned().ok_or_else(|| ConfigError::UnknownPeer {
            peer_id: peer_id.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerDescriptor> {
        self.peers.values()
    }

    /// Identifiers starting with `prefix`, in sorted order (`s` storage, `v` validation)
    pub fn identifiers_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a PeerId> + 'a {
        self.peers.keys().filter(move |id| id.as_str().starts_with(prefix))
    }

    /// Serialize into the published JSON form
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let records: BTreeMap<&str, MinerRecord> = self
            .peers
            .iter()
            .map(|(id, descriptor)| (id.as_str(), descriptor.to_record()))
            .collect();
        serde_json::to_string_pretty(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NoiseKeyPair;

    fn sample_json(public_key: &str) -> String {
        format!(
            r#"{{
                "s0": {{ "serverAddress": "localhost", "serverPort": 4040, "publicKey": "{key}", "identifier": "s0" }},
                "v1": {{ "serverAddress": "10.0.0.2", "serverPort": 2021, "publicKey": "{key}" }}
            }}"#,
            key = public_key
        )
    }

    #[test]
    fn test_parse_published_directory() {
        let key = NoiseKeyPair::generate();
        let directory = PeerDirectory::from_json_str(&sample_json(&key.public_key_hex())).unwrap();

        assert_eq!(directory.len(), 2);
        let s0 = directory.lookup(&PeerId::from("s0")).unwrap();
        assert_eq!(s0.endpoint(), "localhost:4040");
        assert_eq!(s0.public_key, key.public_key_bytes());

        let storage: Vec<_> = directory.identifiers_with_prefix("s").collect();
        assert_eq!(storage, vec![&PeerId::from("s0")]);
    }

    #[test]
    fn test_unknown_peer_error_names_identifier() {
        let directory = PeerDirectory::new();
        let err = directory.lookup(&PeerId::from("xyz")).unwrap_err();
        assert_eq!(err.to_string(), "Server xyz is not one of the available peers to connect to.");
    }

    #[test]
    fn test_invalid_public_key_is_rejected() {
        let err = PeerDirectory::from_json_str(&sample_json("zz")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDirectoryEntry { .. }));
    }

    #[test]
    fn test_directory_round_trips_through_file() {
        let key = NoiseKeyPair::generate();
        let directory = PeerDirectory::from_descriptors([PeerDescriptor::new(
            PeerId::from("s7"),
            "127.0.0.1",
            4047,
            key.public_key_bytes(),
        )]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miner-public-keys.json");
        std::fs::write(&path, directory.to_json_string().unwrap()).unwrap();

        let loaded = PeerDirectory::load(&path).unwrap();
        assert_eq!(loaded.get(&PeerId::from("s7")), directory.get(&PeerId::from("s7")));
    }

    #[test]
    fn test_published_record_strips_secret() {
        let record = MinerRecord {
            server_address: "localhost".to_string(),
            server_port: 2020,
            public_key: "00".repeat(32),
            secret_key: Some("11".repeat(32)),
            identifier: None,
        };
        let published = record.published(&PeerId::from("v0"));
        assert!(published.secret_key.is_none());
        assert_eq!(published.identifier.as_deref(), Some("v0"));
        assert!(!serde_json::to_string(&published).unwrap().contains("secretKey"));
    }
}
