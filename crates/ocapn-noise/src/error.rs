//! Handshake and transport errors.
//!
//! Every failure is terminal for the handshake attempt that raised it. The
//! messages are stable so peers and logs can match on them.

use thiserror::Error;

/// Errors raised by the OCapN Noise handshake and the established channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    // --- Encoding set validation ---
    #[error("Must support at least one encoding version")]
    NoEncodings,

    #[error("Cannot support more than 17 encoding versions simultaneously")]
    TooManyEncodings,

    #[error("Cannot support encoding versions beyond 65535, got {0}")]
    EncodingOutOfRange(u32),

    #[error("Cannot simultaneously support encodings that are more than 16 versions apart, got {0}")]
    EncodingsTooFarApart(String),

    // --- SYN ---
    #[error("OCapN Noise Protocol could not write initiator's SYN message")]
    SynWriteFailed,

    #[error("OCapN Noise Protocol responder cannot read initiator's ed25519 signing key")]
    SigningKeyUnreadable,

    #[error("OCapN Noise Protocol responder cannot read initiator's SYN message")]
    SynUnreadable,

    #[error(
        "OCapN Noise Protocol responder cannot read initiator's ed25519 signature of their x25519 encryption key"
    )]
    InitiatorSignatureUnreadable,

    #[error(
        "OCapN Noise Protocol responder cannot read initiator's ed25519 purported public verifying key"
    )]
    InitiatorVerifyingKeyUnreadable,

    #[error(
        "OCapN Noise Protocol no mutually supported encoding versions. Responder supports {responder}; initiator supports {initiator}"
    )]
    NoMutualEncoding { responder: String, initiator: String },

    // --- SYNACK ---
    #[error("OCapN Noise Protocol responder cannot write SYNACK message")]
    SynackWriteFailed,

    #[error("OCapN Noise Protocol initiator cannot read responder's SYNACK message")]
    SynackUnreadable,

    #[error(
        "Failed invariant: OCapN Noise Protocol initiator cannot get responder's static x25519 encryption key"
    )]
    ResponderStaticKeyMissing,

    #[error(
        "OCapN Noise Protocol initiator cannot read responder's ed25519 purported public verifying key"
    )]
    ResponderVerifyingKeyUnreadable,

    #[error(
        "OCapN Noise Protocol responder's purported ed25519 verifying key does not correspond to their actual x25519 public encryption key"
    )]
    ResponderKeyMismatch,

    #[error("OCapN Noise Protocol responder accepted an encoding the initiator does not support")]
    AcceptedEncodingInvalid,

    // --- ACK ---
    #[error("OCapN Noise Protocol initiator cannot write ACK message")]
    AckWriteFailed,

    #[error("OCapN Noise Protocol responder cannot read initiator's ACK message")]
    AckUnreadable,

    #[error(
        "OCapN Noise Protocol responder cannot get initiator's static x25519 encryption key"
    )]
    InitiatorStaticKeyMissing,

    #[error(
        "OCapN Noise Protocol initiator's purported ed25519 signature does not correspond to their actual x25519 public encryption key"
    )]
    InitiatorSignatureMismatch,

    // --- Established channel ---
    #[error("OCapN Noise Protocol message exceeds maximum length for encryption")]
    MessageTooLongForEncryption,

    #[error("Failed invariant: OCapN Noise Protocol encryption not available")]
    EncryptionFailed,

    #[error("OCapN Noise Protocol message not long enough for decryption")]
    MessageTooShortForDecryption,

    #[error("OCapN Noise Protocol message exceeds maximum length for decryption")]
    MessageTooLongForDecryption,

    #[error("OCapN Noise Protocol decryption failed")]
    DecryptionFailed,
}

/// Alias for Result with HandshakeError.
pub type HandshakeResult<T> = Result<T, HandshakeError>;
