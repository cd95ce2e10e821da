//! Error types for identity and signature handling.

use thiserror::Error;

/// Errors raised while building or checking a peer identity.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// A public key did not decode to a valid Ed25519 point.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A signature had the wrong shape.
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    /// The signature did not verify over the claimed location.
    #[error("Invalid location signature")]
    LocationSignatureMismatch,

    /// The canonical location envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias for Result with IdentityError.
pub type IdentityResult<T> = Result<T, IdentityError>;
