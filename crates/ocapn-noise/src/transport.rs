//! The encrypted channel produced by a completed handshake.

use crate::error::{HandshakeError, HandshakeResult};
use ed25519_dalek::VerifyingKey;
use snow::TransportState;

/// ChaCha20-Poly1305 authentication tag length.
pub const TAG_LENGTH: usize = 16;
/// Largest Noise transport message.
pub const MAX_MESSAGE_LENGTH: usize = 65535;
/// Largest plaintext [`Established::encrypt`] accepts.
pub const MAX_PLAINTEXT_LENGTH: usize = MAX_MESSAGE_LENGTH - TAG_LENGTH;

/// A negotiated, authenticated channel.
///
/// Messages must be decrypted in the order the peer encrypted them.
pub struct Established {
    transport: TransportState,
    encoding: u16,
    peer_key: VerifyingKey,
}

impl Established {
    pub(crate) fn new(transport: TransportState, encoding: u16, peer_key: VerifyingKey) -> Self {
        Self {
            transport,
            encoding,
            peer_key,
        }
    }

    /// Encoding version both sides agreed on.
    pub fn encoding(&self) -> u16 {
        self.encoding
    }

    /// The peer's proven Ed25519 identity.
    pub fn peer_verifying_key(&self) -> &VerifyingKey {
        &self.peer_key
    }

    pub fn encrypt(&mut self, message: &[u8]) -> HandshakeResult<Vec<u8>> {
        if message.len() > MAX_PLAINTEXT_LENGTH {
            return Err(HandshakeError::MessageTooLongForEncryption);
        }
        let mut out = vec![0u8; message.len() + TAG_LENGTH];
        let written = self
            .transport
            .write_message(message, &mut out)
            .map_err(|_| HandshakeError::EncryptionFailed)?;
        out.truncate(written);
        Ok(out)
    }

    pub fn decrypt(&mut self, message: &[u8]) -> HandshakeResult<Vec<u8>> {
        if message.len() < TAG_LENGTH {
            return Err(HandshakeError::MessageTooShortForDecryption);
        }
        if message.len() > MAX_MESSAGE_LENGTH {
            return Err(HandshakeError::MessageTooLongForDecryption);
        }
        let mut out = vec![0u8; message.len() - TAG_LENGTH];
        let read = self
            .transport
            .read_message(message, &mut out)
            .map_err(|_| HandshakeError::DecryptionFailed)?;
        out.truncate(read);
        Ok(out)
    }
}

impl std::fmt::Debug for Established {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Established")
            .field("encoding", &self.encoding)
            .field("peer_key", &self.peer_key)
            .finish_non_exhaustive()
    }
}
