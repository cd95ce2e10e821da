//! OCapN session cryptography.
//!
//! A three-message Noise XX handshake that authenticates both peers by their
//! Ed25519 identities, negotiates a wire-encoding version, and yields an
//! encrypted channel.
//!
//! ```text
//! let initiator = as_initiator(HandshakeConfig::default())?;
//! let responder = as_responder(HandshakeConfig::default())?;
//! let mut syn = [0u8; SYN_LENGTH];
//! let initiator = initiator.write_syn(&mut syn)?;
//! let mut synack = [0u8; SYNACK_LENGTH];
//! let responder = responder.read_syn_write_synack(&syn, &mut synack)?;
//! let mut ack = [0u8; ACK_LENGTH];
//! let mut alice = initiator.read_synack_write_ack(&synack, &mut ack)?;
//! let mut bob = responder.read_ack(&ack)?;
//! ```

pub mod encodings;
pub mod error;
pub mod handshake;
pub mod transport;

pub use encodings::SupportedEncodings;
pub use error::{HandshakeError, HandshakeResult};
pub use handshake::{
    as_initiator, as_responder, HandshakeConfig, Initiator, InitiatorAwaitingSynack, Responder,
    ResponderAwaitingAck, ACK_LENGTH, NOISE_PATTERN, SYNACK_LENGTH, SYN_LENGTH,
};
pub use transport::{Established, MAX_PLAINTEXT_LENGTH};
