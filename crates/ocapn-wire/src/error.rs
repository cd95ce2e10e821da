//! Errors from the session layer.

use ocapn_captp::CapTpError;
use ocapn_types::{IdentityError, LocationId};
use thiserror::Error;

/// Errors from framing, session establishment and the client.
///
/// Problems the peer caused during the handshake (wrong version, bad
/// signature) are answered with `op:abort` and are not errors here.
/// `InvariantViolation` marks states that should be impossible and is fatal
/// to the connection it occurred on.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CapTP error: {0}")]
    CapTp(#[from] CapTpError),
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Truncated frame: need {needed} bytes, have {available}")]
    TruncatedFrame { needed: usize, available: usize },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Protocol invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Netlayer not registered for transport: {0}")]
    NoNetlayer(String),
    #[error("Netlayer already registered for transport: {0}")]
    NetlayerExists(String),
    #[error("Address already in use: {0}")]
    AddressInUse(String),
    #[error("No peer listening at {0}")]
    UnknownLocation(LocationId),
    #[error("Refusing to connect to self ({0})")]
    ConnectToSelf(LocationId),
    #[error("Peer aborted session: {0}")]
    PeerAborted(String),
    #[error("Session ended: {0}")]
    SessionEnded(String),
}

/// Alias for Result with WireError.
pub type WireResult<T> = Result<T, WireError>;
