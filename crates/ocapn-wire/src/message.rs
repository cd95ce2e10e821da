//! Handshake messages and the default frame codec.
//!
//! Every message travels as one frame: a 4-byte big-endian length header
//! followed by a JSON body. A single transport write may carry several
//! frames. Until a session exists, bodies are [`HandshakeMessage`]s; after
//! that they are CapTP messages.

use crate::error::{WireError, WireResult};
use ocapn_types::{Location, LocationSignature, PublicKeyDescriptor, SelfIdentity};
use serde::{Deserialize, Serialize};

/// Size of the length header in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

/// Messages exchanged before a session is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    /// Introduce ourselves: our session key and our signed location.
    #[serde(rename = "op:start-session")]
    StartSession {
        /// CapTP version the sender speaks.
        #[serde(rename = "captpVersion")]
        captp_version: String,
        /// Per-connection Ed25519 key.
        #[serde(rename = "sessionPublicKey")]
        session_public_key: PublicKeyDescriptor,
        /// Where the sender can be reached.
        location: Location,
        /// Signature over the `my-location` envelope for `location`.
        #[serde(rename = "locationSignature")]
        location_signature: LocationSignature,
    },
    /// Refuse or tear down the session. The sender closes the connection.
    #[serde(rename = "op:abort")]
    Abort {
        /// Human-readable cause.
        reason: String,
    },
}

impl HandshakeMessage {
    /// `op:start-session` for the identity used on one connection.
    pub fn start_session(identity: &SelfIdentity, captp_version: &str) -> Self {
        HandshakeMessage::StartSession {
            captp_version: captp_version.to_string(),
            session_public_key: identity.public_key().descriptor(),
            location: identity.location.clone(),
            location_signature: identity.location_signature.clone(),
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        HandshakeMessage::Abort {
            reason: reason.into(),
        }
    }

    /// The wire `type` tag, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            HandshakeMessage::StartSession { .. } => "op:start-session",
            HandshakeMessage::Abort { .. } => "op:abort",
        }
    }
}

/// Prefix `body` with its length.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let len = body.len() as u32;
    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

/// Serialize a message to JSON and frame it.
pub fn encode_message<T: Serialize>(message: &T) -> WireResult<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    Ok(encode_frame(&json))
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Split one transport write into frame bodies.
pub fn split_frames(data: &[u8], max_frame_size: u32) -> WireResult<Vec<&[u8]>> {
    let mut frames = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < FRAME_HEADER_LEN {
            return Err(WireError::TruncatedFrame {
                needed: FRAME_HEADER_LEN,
                available: rest.len(),
            });
        }
        let header = [rest[0], rest[1], rest[2], rest[3]];
        let len = decode_length(&header);
        if len > max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: max_frame_size,
            });
        }
        let body = &rest[FRAME_HEADER_LEN..];
        let len = len as usize;
        if body.len() < len {
            return Err(WireError::TruncatedFrame {
                needed: len,
                available: body.len(),
            });
        }
        frames.push(&body[..len]);
        rest = &body[len..];
    }
    Ok(frames)
}

/// Parse a frame body into a handshake message.
pub fn decode_handshake(body: &[u8]) -> WireResult<HandshakeMessage> {
    Ok(serde_json::from_slice(body)?)
}
