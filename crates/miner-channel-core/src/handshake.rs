//! Handshake driver
//!
//! Runs a [`NoiseHandshake`] to completion over any framed byte stream,
//! alternating writes and reads as the pattern dictates. Shared by the
//! initiator engines and the responder used in tests and tooling.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::crypto::{LinkCipher, NoiseHandshake};
use crate::framing::{read_frame, write_frame};
use crate::{ChannelError, Result};

/// Outcome of a finished handshake
#[derive(Debug)]
pub struct EstablishedLink {
    pub cipher: LinkCipher,
    pub remote_static: Option<[u8; 32]>,
}

/// Drive the handshake until both sides have derived transport keys
pub async fn drive_handshake<S>(stream: &mut S, mut handshake: NoiseHandshake) -> Result<EstablishedLink>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    while !handshake.is_handshake_finished() {
        if handshake.is_my_turn() {
            let message = handshake.write_message(&[])?;
            write_frame(stream, &message).await?;
        } else {
            let message = read_frame(stream).await?.ok_or_else(|| {
                ChannelError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed during handshake",
                ))
            })?;
            handshake.read_message(&message)?;
        }
    }

    let remote_static = handshake.remote_static();
    let cipher = handshake.into_link_cipher()?;
    Ok(EstablishedLink { cipher, remote_static })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CipherChoice, NoiseKeyPair, NoiseSuite};
    use crate::engine::HandshakePattern;

    #[tokio::test]
    async fn test_drive_handshake_over_duplex() {
        let suite = NoiseSuite::new(HandshakePattern::Xk, CipherChoice::ChaChaPolyBlake2b);
        let client_key = NoiseKeyPair::generate();
        let server_key = NoiseKeyPair::generate();
        let (mut client_io, mut server_io) = tokio::io::duplex(4096);

        let initiator = NoiseHandshake::initiator(&suite, &client_key, &server_key.public_key_bytes()).unwrap();
        let responder = NoiseHandshake::responder(&suite, &server_key).unwrap();

        let server = tokio::spawn(async move { drive_handshake(&mut server_io, responder).await });
        let client = drive_handshake(&mut client_io, initiator).await.unwrap();
        let server = server.await.unwrap().unwrap();

        assert_eq!(client.remote_static, Some(server_key.public_key_bytes()));
        assert_eq!(server.remote_static, Some(client_key.public_key_bytes()));

        let sealed = client.cipher.seal(0, b"ping").unwrap();
        assert_eq!(server.cipher.open(0, &sealed).unwrap(), b"ping");
    }

    #[tokio::test]
    async fn test_drive_handshake_fails_when_peer_hangs_up() {
        let suite = NoiseSuite::new(HandshakePattern::Xx, CipherChoice::AesGcmSha256);
        let client_key = NoiseKeyPair::generate();
        let (mut client_io, server_io) = tokio::io::duplex(4096);
        drop(server_io);

        let initiator = NoiseHandshake::initiator(&suite, &client_key, &[0u8; 32]).unwrap();
        assert!(drive_handshake(&mut client_io, initiator).await.is_err());
    }
}
