//! The three-message OCapN handshake over `Noise_XX_25519_ChaChaPoly_BLAKE2s`.
//!
//! ```text
//! initiator                                   responder
//!   SYN     -> e, payload(vk_i, sig_i(s_i), encodings)      132 bytes
//!   SYNACK  <- e, ee, s, es, payload(vk_r, accepted)        129 bytes
//!   ACK     -> s, se                                         64 bytes
//! ```
//!
//! The initiator uses a fresh X25519 static key and binds it to its Ed25519
//! identity with a signature carried in the SYN; the responder checks that
//! signature once the ACK reveals the static key. The responder's static key
//! is the X25519 form of its Ed25519 signing key, so the initiator only has to
//! compare the Montgomery form of the claimed verifying key with the static
//! key Noise authenticated.
//!
//! Each role is a chain of owned states. Every step consumes the previous
//! state, so a handshake cannot be replayed or resumed after a failure.

use crate::encodings::{SupportedEncodings, ENCODED_LENGTH};
use crate::error::{HandshakeError, HandshakeResult};
use crate::transport::Established;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use snow::params::NoiseParams;
use snow::{Builder, HandshakeState};
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

/// Noise protocol name.
pub const NOISE_PATTERN: &str = "Noise_XX_25519_ChaChaPoly_BLAKE2s";

/// Size of the initiator's first message.
pub const SYN_LENGTH: usize = 32 + SYN_PAYLOAD_LENGTH;
/// Size of the responder's reply.
pub const SYNACK_LENGTH: usize = 96 + SYNACK_PAYLOAD_LENGTH;
/// Size of the initiator's final message.
pub const ACK_LENGTH: usize = 64;

const VERIFYING_KEY_LENGTH: usize = 32;
const SIGNATURE_LENGTH: usize = 64;
const SYN_PAYLOAD_LENGTH: usize = VERIFYING_KEY_LENGTH + SIGNATURE_LENGTH + ENCODED_LENGTH;
const SYNACK_PAYLOAD_LENGTH: usize = VERIFYING_KEY_LENGTH + 1;

/// Options shared by both roles.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Long-term identity. A fresh key is generated when absent.
    pub signing_key: Option<SigningKey>,
    /// Encoding versions this side can speak.
    pub supported_encodings: Vec<u32>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            supported_encodings: vec![0],
        }
    }
}

impl HandshakeConfig {
    pub fn with_encodings(supported_encodings: Vec<u32>) -> Self {
        Self {
            signing_key: None,
            supported_encodings,
        }
    }
}

/// AEAD tag length snow reserves after every payload.
const TAG_LENGTH: usize = 16;

fn noise_params(on_error: HandshakeError) -> HandshakeResult<NoiseParams> {
    NOISE_PATTERN.parse().map_err(|_| on_error)
}

/// Write a handshake message that must come out exactly `N` bytes long.
///
/// snow reserves room for a tag even on messages that carry none, so the
/// write goes through a scratch buffer larger than the final message.
fn write_exact<const N: usize>(
    noise: &mut HandshakeState,
    payload: &[u8],
    out: &mut [u8; N],
    on_error: HandshakeError,
) -> HandshakeResult<()> {
    let mut scratch = Zeroizing::new(vec![0u8; N + TAG_LENGTH]);
    let written = noise
        .write_message(payload, &mut scratch)
        .map_err(|_| on_error.clone())?;
    if written != N {
        return Err(on_error);
    }
    out.copy_from_slice(&scratch[..N]);
    Ok(())
}

/// Create the initiating side of a handshake.
pub fn as_initiator(config: HandshakeConfig) -> HandshakeResult<Initiator> {
    Initiator::new(config)
}

/// Create the responding side of a handshake.
pub fn as_responder(config: HandshakeConfig) -> HandshakeResult<Responder> {
    Responder::new(config)
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Initiator with keys ready, about to send SYN.
pub struct Initiator {
    signing_key: SigningKey,
    encodings: SupportedEncodings,
}

impl Initiator {
    pub fn new(config: HandshakeConfig) -> HandshakeResult<Self> {
        let encodings = SupportedEncodings::new(&config.supported_encodings)?;
        let signing_key = config
            .signing_key
            .unwrap_or_else(|| SigningKey::generate(&mut OsRng));
        Ok(Self {
            signing_key,
            encodings,
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Write the SYN into `syn` and wait for the responder's SYNACK.
    pub fn write_syn(self, syn: &mut [u8; SYN_LENGTH]) -> HandshakeResult<InitiatorAwaitingSynack> {
        let builder = Builder::new(noise_params(HandshakeError::SynWriteFailed)?);
        let keypair = builder
            .generate_keypair()
            .map_err(|_| HandshakeError::SynWriteFailed)?;
        let private = Zeroizing::new(keypair.private);
        let mut noise = builder
            .local_private_key(&private)
            .build_initiator()
            .map_err(|_| HandshakeError::SynWriteFailed)?;

        let signature = self.signing_key.sign(&keypair.public);
        let mut payload = [0u8; SYN_PAYLOAD_LENGTH];
        payload[..VERIFYING_KEY_LENGTH].copy_from_slice(self.verifying_key().as_bytes());
        payload[VERIFYING_KEY_LENGTH..VERIFYING_KEY_LENGTH + SIGNATURE_LENGTH]
            .copy_from_slice(&signature.to_bytes());
        payload[VERIFYING_KEY_LENGTH + SIGNATURE_LENGTH..].copy_from_slice(&self.encodings.encode());

        write_exact(&mut noise, &payload, syn, HandshakeError::SynWriteFailed)?;
        debug!(encodings = ?self.encodings.as_slice(), "Wrote SYN");

        Ok(InitiatorAwaitingSynack {
            noise,
            signing_key: self.signing_key,
            encodings: self.encodings,
        })
    }
}

/// Initiator that sent SYN and expects SYNACK.
pub struct InitiatorAwaitingSynack {
    noise: HandshakeState,
    signing_key: SigningKey,
    encodings: SupportedEncodings,
}

impl InitiatorAwaitingSynack {
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Check the responder's SYNACK, write the ACK into `ack` and open the
    /// channel.
    pub fn read_synack_write_ack(
        mut self,
        synack: &[u8],
        ack: &mut [u8; ACK_LENGTH],
    ) -> HandshakeResult<Established> {
        if synack.len() != SYNACK_LENGTH {
            return Err(HandshakeError::SynackUnreadable);
        }
        let mut payload = [0u8; SYNACK_LENGTH];
        let read = self
            .noise
            .read_message(synack, &mut payload)
            .map_err(|_| HandshakeError::SynackUnreadable)?;
        if read != SYNACK_PAYLOAD_LENGTH {
            return Err(HandshakeError::SynackUnreadable);
        }

        let remote_static = self
            .noise
            .get_remote_static()
            .ok_or(HandshakeError::ResponderStaticKeyMissing)?;
        let mut vk_bytes = [0u8; VERIFYING_KEY_LENGTH];
        vk_bytes.copy_from_slice(&payload[..VERIFYING_KEY_LENGTH]);
        let responder_key = VerifyingKey::from_bytes(&vk_bytes)
            .map_err(|_| HandshakeError::ResponderVerifyingKeyUnreadable)?;
        let expected_static = responder_key.to_montgomery().to_bytes();
        if !bool::from(expected_static.as_slice().ct_eq(remote_static)) {
            return Err(HandshakeError::ResponderKeyMismatch);
        }

        let offset = payload[VERIFYING_KEY_LENGTH];
        if offset > 16 {
            return Err(HandshakeError::AcceptedEncodingInvalid);
        }
        let encoding = u32::from(self.encodings.lowest()) + u32::from(offset);
        let encoding =
            u16::try_from(encoding).map_err(|_| HandshakeError::AcceptedEncodingInvalid)?;
        if !self.encodings.contains(encoding) {
            return Err(HandshakeError::AcceptedEncodingInvalid);
        }

        write_exact(&mut self.noise, &[], ack, HandshakeError::AckWriteFailed)?;
        let transport = self
            .noise
            .into_transport_mode()
            .map_err(|_| HandshakeError::AckWriteFailed)?;
        debug!(encoding, "Initiator handshake complete");

        Ok(Established::new(transport, encoding, responder_key))
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Responder with keys ready, waiting for SYN.
pub struct Responder {
    signing_key: SigningKey,
    encodings: SupportedEncodings,
}

impl Responder {
    pub fn new(config: HandshakeConfig) -> HandshakeResult<Self> {
        let encodings = SupportedEncodings::new(&config.supported_encodings)?;
        let signing_key = config
            .signing_key
            .unwrap_or_else(|| SigningKey::generate(&mut OsRng));
        Ok(Self {
            signing_key,
            encodings,
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Check the initiator's SYN, negotiate an encoding and write the SYNACK
    /// into `synack`.
    pub fn read_syn_write_synack(
        self,
        syn: &[u8],
        synack: &mut [u8; SYNACK_LENGTH],
    ) -> HandshakeResult<ResponderAwaitingAck> {
        let static_key = Zeroizing::new(self.signing_key.to_scalar_bytes());
        let mut noise = Builder::new(noise_params(HandshakeError::SigningKeyUnreadable)?)
            .local_private_key(static_key.as_slice())
            .build_responder()
            .map_err(|_| HandshakeError::SigningKeyUnreadable)?;

        if syn.len() != SYN_LENGTH {
            return Err(HandshakeError::SynUnreadable);
        }
        let mut payload = [0u8; SYN_LENGTH];
        let read = noise
            .read_message(syn, &mut payload)
            .map_err(|_| HandshakeError::SynUnreadable)?;
        if read != SYN_PAYLOAD_LENGTH {
            return Err(HandshakeError::SynUnreadable);
        }

        let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
        signature_bytes
            .copy_from_slice(&payload[VERIFYING_KEY_LENGTH..VERIFYING_KEY_LENGTH + SIGNATURE_LENGTH]);
        // The scalar half of an Ed25519 signature is below 2^253.
        if signature_bytes[SIGNATURE_LENGTH - 1] & 0xe0 != 0 {
            return Err(HandshakeError::InitiatorSignatureUnreadable);
        }
        let initiator_signature = Signature::from_bytes(&signature_bytes);

        let mut vk_bytes = [0u8; VERIFYING_KEY_LENGTH];
        vk_bytes.copy_from_slice(&payload[..VERIFYING_KEY_LENGTH]);
        let initiator_key = VerifyingKey::from_bytes(&vk_bytes)
            .map_err(|_| HandshakeError::InitiatorVerifyingKeyUnreadable)?;

        let mut encoded = [0u8; ENCODED_LENGTH];
        encoded.copy_from_slice(&payload[VERIFYING_KEY_LENGTH + SIGNATURE_LENGTH..SYN_PAYLOAD_LENGTH]);
        let initiator_encodings =
            SupportedEncodings::decode(encoded).map_err(|_| HandshakeError::SynUnreadable)?;
        let encoding = self.encodings.negotiate(&initiator_encodings)?;
        // negotiate() only returns members of the initiator's set
        let offset = (encoding - initiator_encodings.lowest()) as u8;

        let mut reply = [0u8; SYNACK_PAYLOAD_LENGTH];
        reply[..VERIFYING_KEY_LENGTH].copy_from_slice(self.verifying_key().as_bytes());
        reply[VERIFYING_KEY_LENGTH] = offset;
        write_exact(&mut noise, &reply, synack, HandshakeError::SynackWriteFailed)?;
        debug!(encoding, "Wrote SYNACK");

        Ok(ResponderAwaitingAck {
            noise,
            encoding,
            initiator_key,
            initiator_signature,
        })
    }
}

/// Responder that sent SYNACK and expects ACK.
pub struct ResponderAwaitingAck {
    noise: HandshakeState,
    encoding: u16,
    initiator_key: VerifyingKey,
    initiator_signature: Signature,
}

impl ResponderAwaitingAck {
    /// The initiator's claimed Ed25519 identity. Not yet proven until
    /// [`read_ack`](Self::read_ack) succeeds.
    pub fn initiator_verifying_key(&self) -> &VerifyingKey {
        &self.initiator_key
    }

    pub fn encoding(&self) -> u16 {
        self.encoding
    }

    /// Check the ACK and the initiator's signature over its static key.
    pub fn read_ack(mut self, ack: &[u8]) -> HandshakeResult<Established> {
        if ack.len() != ACK_LENGTH {
            return Err(HandshakeError::AckUnreadable);
        }
        let mut payload = [0u8; ACK_LENGTH];
        self.noise
            .read_message(ack, &mut payload)
            .map_err(|_| HandshakeError::AckUnreadable)?;

        let remote_static = self
            .noise
            .get_remote_static()
            .ok_or(HandshakeError::InitiatorStaticKeyMissing)?;
        self.initiator_key
            .verify(remote_static, &self.initiator_signature)
            .map_err(|_| HandshakeError::InitiatorSignatureMismatch)?;

        let transport = self
            .noise
            .into_transport_mode()
            .map_err(|_| HandshakeError::AckUnreadable)?;
        debug!(encoding = self.encoding, "Responder handshake complete");

        Ok(Established::new(
            transport,
            self.encoding,
            self.initiator_key,
        ))
    }
}
