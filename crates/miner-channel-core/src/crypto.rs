//! Cryptographic primitives for the miner channel
//!
//! Thin wrappers around X25519 key material and the `snow` Noise implementation:
//! key pairs, cipher suites, handshake state, and the post-handshake link cipher
//! used by the engines.

use rand_core::{CryptoRng, OsRng, RngCore};
use sha2::{Digest, Sha256};
use snow::params::NoiseParams;
use snow::{Builder, HandshakeState, StatelessTransportState};

use crate::engine::HandshakePattern;
use crate::errors::ConfigError;
use crate::framing::{MAX_NOISE_MESSAGE, MAX_PAYLOAD, TAG_LEN};
use crate::{ChannelError, EngineError, Result};

// ----------------------------------------------------------------------------
// Noise Key Pair (X25519)
// ----------------------------------------------------------------------------

/// X25519 static key pair used as a miner's Noise identity
#[derive(Clone)]
pub struct NoiseKeyPair {
    private_key: [u8; 32],
    public_key: [u8; 32],
}

impl core::fmt::Debug for NoiseKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NoiseKeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl NoiseKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new key pair with a caller-supplied RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut private_key = [0u8; 32];
        rng.fill_bytes(&mut private_key);
        Self::from_bytes(&private_key)
    }

    /// Derive the key pair from raw private key bytes
    pub fn from_bytes(private_key: &[u8; 32]) -> Self {
        let public_key = x25519_dalek::x25519(*private_key, x25519_dalek::X25519_BASEPOINT_BYTES);
        Self {
            private_key: *private_key,
            public_key,
        }
    }

    /// Parse a hex-encoded 32-byte private key
    pub fn from_hex(private_key: &str) -> core::result::Result<Self, ConfigError> {
        let bytes = decode_key(private_key).map_err(|reason| ConfigError::InvalidPrivateKey { reason })?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.private_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }
}

/// Decode a hex string into a 32-byte key
pub fn decode_key(encoded: &str) -> core::result::Result<[u8; 32], String> {
    let bytes = hex::decode(encoded.trim()).map_err(|e| e.to_string())?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| format!("expected 32 bytes, got {}", bytes.len()))
}

/// Short SHA-256 fingerprint of a public key, for logs and tooling output
pub fn key_fingerprint<T: AsRef<[u8]>>(public_key: T) -> String {
    let digest = Sha256::digest(public_key.as_ref());
    hex::encode(&digest[..8])
}

// ----------------------------------------------------------------------------
// Cipher Suites
// ----------------------------------------------------------------------------

/// Symmetric cipher and hash pairing of a Noise suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherChoice {
    /// `AESGCM_SHA256`
    AesGcmSha256,
    /// `ChaChaPoly_BLAKE2b`
    ChaChaPolyBlake2b,
}

impl CipherChoice {
    fn suffix(&self) -> &'static str {
        match self {
            CipherChoice::AesGcmSha256 => "AESGCM_SHA256",
            CipherChoice::ChaChaPolyBlake2b => "ChaChaPoly_BLAKE2b",
        }
    }
}

/// A complete Noise protocol name: pattern, DH function, cipher and hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseSuite {
    pub pattern: HandshakePattern,
    pub cipher: CipherChoice,
}

impl NoiseSuite {
    pub fn new(pattern: HandshakePattern, cipher: CipherChoice) -> Self {
        Self { pattern, cipher }
    }

    /// Protocol name, e.g. `Noise_XX_25519_AESGCM_SHA256`
    pub fn protocol_name(&self) -> String {
        format!("Noise_{}_25519_{}", self.pattern.as_str(), self.cipher.suffix())
    }

    fn params(&self) -> Result<NoiseParams> {
        Ok(self.protocol_name().parse()?)
    }
}

// ----------------------------------------------------------------------------
// Noise Protocol Handshake
// ----------------------------------------------------------------------------

/// Noise handshake state for one side of a connection
pub struct NoiseHandshake {
    state: HandshakeState,
}

impl core::fmt::Debug for NoiseHandshake {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NoiseHandshake")
            .field("state", &"<HandshakeState>")
            .finish()
    }
}

impl NoiseHandshake {
    /// Create initiator handshake. `remote_key` is only used by patterns that
    /// know the responder's static key up front (`IK`, `XK`).
    pub fn initiator(suite: &NoiseSuite, local_key: &NoiseKeyPair, remote_key: &[u8; 32]) -> Result<Self> {
        let private_key = local_key.private_key_bytes();
        let builder = Builder::new(suite.params()?).local_private_key(&private_key);
        let builder = if suite.pattern.needs_remote_key() {
            builder.remote_public_key(remote_key)
        } else {
            builder
        };
        Ok(Self {
            state: builder.build_initiator()?,
        })
    }

    /// Create responder handshake
    pub fn responder(suite: &NoiseSuite, local_key: &NoiseKeyPair) -> Result<Self> {
        let private_key = local_key.private_key_bytes();
        let state = Builder::new(suite.params()?)
            .local_private_key(&private_key)
            .build_responder()?;
        Ok(Self { state })
    }

    /// Write handshake message
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_NOISE_MESSAGE];
        let len = self.state.write_message(payload, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    /// Read handshake message
    pub fn read_message(&mut self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; MAX_NOISE_MESSAGE];
        let len = self.state.read_message(input, &mut output)?;
        output.truncate(len);
        Ok(output)
    }

    pub fn is_my_turn(&self) -> bool {
        self.state.is_my_turn()
    }

    pub fn is_handshake_finished(&self) -> bool {
        self.state.is_handshake_finished()
    }

    /// Remote static key, available once the pattern has transmitted it
    pub fn remote_static(&self) -> Option<[u8; 32]> {
        self.state
            .get_remote_static()
            .and_then(|key| <[u8; 32]>::try_from(key).ok())
    }

    /// Convert to transport mode
    pub fn into_link_cipher(self) -> Result<LinkCipher> {
        let state = self.state.into_stateless_transport_mode()?;
        Ok(LinkCipher { state })
    }
}

// ----------------------------------------------------------------------------
// Link Cipher
// ----------------------------------------------------------------------------

/// Post-handshake cipher with explicit per-direction nonces, so the reader and
/// writer halves of a connection can share it without locking.
pub struct LinkCipher {
    state: StatelessTransportState,
}

impl core::fmt::Debug for LinkCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinkCipher")
            .field("state", &"<StatelessTransportState>")
            .finish()
    }
}

impl LinkCipher {
    /// Encrypt one outbound payload with the sending nonce
    pub fn seal(&self, nonce: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.len() > MAX_PAYLOAD {
            return Err(ChannelError::Engine(EngineError::PayloadTooLarge {
                size: plaintext.len(),
                max: MAX_PAYLOAD,
            }));
        }
        let mut ciphertext = vec![0u8; plaintext.len() + TAG_LEN];
        let len = self.state.write_message(nonce, plaintext, &mut ciphertext)?;
        ciphertext.truncate(len);
        Ok(ciphertext)
    }

    /// Decrypt one inbound frame with the receiving nonce
    pub fn open(&self, nonce: u64, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut plaintext = vec![0u8; ciphertext.len()];
        let len = self.state.read_message(nonce, ciphertext, &mut plaintext)?;
        plaintext.truncate(len);
        Ok(plaintext)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
